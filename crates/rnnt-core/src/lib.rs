//! # rnnt-core
//!
//! Базовые типы, трейты и определения ошибок для RustRNNT.
//!
//! Этот крейт предоставляет фундаментальные абстракции для остальных
//! крейтов workspace:
//!
//! - Общие типы данных (`Hypothesis`, `PredictorState`, `SearchHypothesis`)
//! - Интерфейсы непрозрачных модулей (энкодер, предиктор, joint,
//!   CTC-голова, attention-декодер, RNN-T loss-ядро, prefix beam search)
//! - Унифицированная обработка ошибок через `RnntError`

pub mod error;
pub mod traits;
pub mod types;

pub use error::{RnntError, RnntResult};
pub use traits::{
    AttentionDecoder, CtcHead, Encoder, JointNetwork, Predictor, PrefixBeamSearch,
    TransducerLossKernel,
};
pub use types::{Hypothesis, LossReduction, PredictorState, SearchHypothesis, StateInitMethod};

//! # rnnt-model
//!
//! Ядро RNN-T транс-дьюсера: композиция обучающего loss по трём веткам
//! (transducer / CTC / attention), frame-synchronous greedy-декодер,
//! контракт prefix beam search и attention rescoring с bidirectional
//! score-слиянием.
//!
//! Нейросетевые модули (энкодер, предиктор, joint, CTC-голова,
//! attention-декодер, RNN-T loss-ядро) — непрозрачные коллабораторы,
//! подключаемые через traits из [`rnnt_core`].

pub mod config;
pub mod greedy;
pub mod labels;
pub mod loss;
pub mod model;
pub mod rescore;

pub use config::{GreedySearchConfig, TransducerConfig};
pub use greedy::GreedyDecoder;
pub use loss::{LabelSmoothingLoss, LossBundle};
pub use model::Transducer;
pub use rescore::RescoringOptions;

//! Интерфейсы непрозрачных модулей транс-дьюсера.
//!
//! Ядро декодирования не заглядывает внутрь энкодера, предиктора,
//! joint-сети, CTC-головы и attention-декодера — это дифференцируемые
//! «чёрные ящики» с документированными тензорными контрактами.
//! Конкретные реализации (candle-модели, ONNX-биндинги, моки в тестах)
//! подключаются через эти traits.

use candle_core::Tensor;

use crate::error::RnntResult;
use crate::types::{LossReduction, PredictorState, SearchHypothesis, StateInitMethod};

/// Акустический энкодер.
pub trait Encoder {
    /// Полный forward по утверансу.
    ///
    /// # Аргументы
    /// * `xs` — фичи, [B, T_in, F].
    /// * `xs_lens` — длины, [B].
    /// * `decoding_chunk_size` — размер чанка: `<0` полный контекст,
    ///   `>0` фиксированный чанк, `0` только для обучения.
    /// * `num_decoding_left_chunks` — число левых чанков (`<0` = все).
    ///
    /// # Возвращает
    /// `(encoder_out [B, T, D], mask [B, 1, T])`, mask — U8, 1 = валидный кадр.
    fn forward(
        &self,
        xs: &Tensor,
        xs_lens: &Tensor,
        decoding_chunk_size: isize,
        num_decoding_left_chunks: isize,
    ) -> RnntResult<(Tensor, Tensor)>;

    /// Потоковый forward одного чанка с кэшами attention/convolution.
    ///
    /// Возвращает `(chunk_out, new_att_cache, new_cnn_cache)`.
    fn forward_chunk(
        &self,
        xs: &Tensor,
        offset: usize,
        required_cache_size: isize,
        att_cache: &Tensor,
        cnn_cache: &Tensor,
    ) -> RnntResult<(Tensor, Tensor, Tensor)>;
}

/// Предсказательная сеть (stateful-предиктор транс-дьюсера).
pub trait Predictor {
    /// Forward по всей последовательности меток `ys` [B, L] (I64).
    ///
    /// Возвращает predictor-выход [B, L, P].
    fn forward(&self, ys: &Tensor) -> RnntResult<Tensor>;

    /// Один шаг предиктора.
    ///
    /// # Аргументы
    /// * `label` — входной токен, [B, 1] (I64).
    /// * `padding` — padding-маска шага, [B, 1].
    /// * `state` — текущее рекуррентное состояние.
    ///
    /// Возвращает `(out [B, 1, P], новое состояние)`. Состояние не
    /// мутируется — вызывающий сам решает, коммитить ли его.
    fn forward_step(
        &self,
        label: &Tensor,
        padding: &Tensor,
        state: &PredictorState,
    ) -> RnntResult<(Tensor, PredictorState)>;

    /// Начальное состояние для батча `batch`.
    fn init_state(&self, batch: usize, method: StateInitMethod) -> RnntResult<PredictorState>;
}

/// Joint-сеть: объединяет энкодер- и предиктор-выходы в logits по словарю.
pub trait JointNetwork {
    /// `enc_out` [B, T, 1, D] broadcast-совместим с `pred_out` [B, 1, L, P]
    /// (или по одному шагу: [B, 1, D] и [B, 1, P]).
    ///
    /// Возвращает logits `[.., vocab]`.
    fn forward(&self, enc_out: &Tensor, pred_out: &Tensor) -> RnntResult<Tensor>;
}

/// CTC-голова: вычисляет CTC loss по энкодер-выходу.
pub trait CtcHead {
    /// Возвращает скалярный loss (или [B] — вызывающий суммирует).
    fn forward(
        &self,
        encoder_out: &Tensor,
        encoder_out_lens: &Tensor,
        text: &Tensor,
        text_lengths: &Tensor,
    ) -> RnntResult<Tensor>;
}

/// Attention-декодер (трансформерный, опционально двунаправленный).
pub trait AttentionDecoder {
    /// Forward по батчу гипотез.
    ///
    /// # Аргументы
    /// * `encoder_out` — [B, T, D], read-only, общий для всех гипотез.
    /// * `encoder_mask` — [B, 1, T] (U8).
    /// * `ys_in` — метки с sos, [B, L+1] (I64).
    /// * `ys_in_lens` — длины с учётом sos, [B].
    /// * `r_ys_in` — реверсированные метки с sos (для right-to-left ветки).
    /// * `reverse_weight` — вес реверс-ветки; при `0.0` реверс-logits
    ///   возвращаются нулевым тензором.
    ///
    /// Возвращает `(forward_logits [B, L+1, V], reverse_logits [B, L+1, V])`.
    fn forward(
        &self,
        encoder_out: &Tensor,
        encoder_mask: &Tensor,
        ys_in: &Tensor,
        ys_in_lens: &Tensor,
        r_ys_in: &Tensor,
        reverse_weight: f32,
    ) -> RnntResult<(Tensor, Tensor)>;

    /// Есть ли у декодера right-to-left ветка.
    ///
    /// `reverse_weight > 0` при rescoring требует `true` — иначе
    /// фатальная конфигурационная ошибка.
    fn has_reverse_decoder(&self) -> bool {
        false
    }
}

/// RNN-T loss-ядро (внешний примитив, например torchaudio/warp-rnnt биндинг).
///
/// Контракт по dtype: `labels`, `logit_lengths`, `label_lengths` — U32
/// (узкий целочисленный тип ядра; ignore-id обязан быть заранее
/// переотображён в 0, см. `labels::remap_pad_for_loss`).
pub trait TransducerLossKernel {
    /// `logits` — [B, T, L+1, V]; возвращает [B] при `None`-редукции,
    /// скаляр при `Mean`.
    fn rnnt_loss(
        &self,
        logits: &Tensor,
        labels: &Tensor,
        logit_lengths: &Tensor,
        label_lengths: &Tensor,
        blank: u32,
        reduction: LossReduction,
    ) -> RnntResult<Tensor>;
}

/// Prefix beam search — внешний коллаборатор.
///
/// Поиск сам прогоняет энкодер по сырым фичам, держит по одному
/// независимому состоянию предиктора на живую гипотезу и ранжирует
/// префиксы смесью `ctc_weight * ctc_prob + transducer_weight * td_prob`.
pub trait PrefixBeamSearch {
    /// Возвращает ровно `beam_size` финализированных гипотез (каждая с
    /// ведущим стартовым sentinel в `hyp`) и единственный общий
    /// encoder-выход [1, T, D].
    #[allow(clippy::too_many_arguments)]
    fn prefix_beam_search(
        &self,
        speech: &Tensor,
        speech_lengths: &Tensor,
        decoding_chunk_size: isize,
        beam_size: usize,
        num_decoding_left_chunks: isize,
        ctc_weight: f32,
        transducer_weight: f32,
    ) -> RnntResult<(Vec<SearchHypothesis>, Tensor)>;
}

//! Synthetic collaborators for transducer decoding tests.
//!
//! Нейросетевые модули заменяются детерминированными заглушками:
//! энкодер отдаёт заранее заданный тензор, joint читает номер кадра из
//! значения энкодер-выхода и возвращает строку logits из таблицы,
//! счётчики вызовов позволяют проверять, что ветки с нулевым весом
//! не вычисляются вовсе.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use candle_core::{DType, Device, Tensor};

use rnnt_core::{
    AttentionDecoder, CtcHead, Encoder, JointNetwork, LossReduction, Predictor, PredictorState,
    PrefixBeamSearch, RnntResult, SearchHypothesis, StateInitMethod, TransducerLossKernel,
};
use rnnt_model::{GreedySearchConfig, TransducerConfig};

pub fn device() -> Device {
    Device::Cpu
}

/// Базовая конфигурация: чистый transducer (td=1.0), blank=0.
pub fn test_config(vocab_size: usize) -> TransducerConfig {
    TransducerConfig {
        vocab_size,
        blank_id: 0,
        ignore_id: -1,
        ctc_weight: 0.0,
        transducer_weight: 1.0,
        attention_weight: 0.0,
        reverse_weight: 0.0,
        lsm_weight: 0.0,
        length_normalized_loss: false,
        greedy: GreedySearchConfig::default(),
    }
}

/// Фиктивные фичи batch=1 и длины для decode-вызовов.
pub fn dummy_speech(batch: usize) -> (Tensor, Tensor) {
    let speech = Tensor::zeros((batch, 1, 1), DType::F32, &device()).unwrap();
    let lens = Tensor::from_vec(vec![1i64; batch], batch, &device()).unwrap();
    (speech, lens)
}

/// Энкодер-выход [1, T, 1], где значение кадра = его индекс.
/// Позволяет TableJoint понять, на каком кадре его вызвали.
pub fn frame_index_encoder_out(t: usize) -> Tensor {
    let vals: Vec<f32> = (0..t).map(|i| i as f32).collect();
    Tensor::from_vec(vals, (1, t, 1), &device()).unwrap()
}

// ---------------------------------------------------------------------------
// Энкодер
// ---------------------------------------------------------------------------

/// Энкодер, игнорирующий вход и возвращающий заранее заданный выход.
pub struct FixedEncoder {
    pub out: Tensor,
    pub lens: Vec<u32>,
}

impl Encoder for FixedEncoder {
    fn forward(
        &self,
        _xs: &Tensor,
        _xs_lens: &Tensor,
        _decoding_chunk_size: isize,
        _num_decoding_left_chunks: isize,
    ) -> RnntResult<(Tensor, Tensor)> {
        let (b, t, _) = self.out.dims3()?;
        let mut mask = Vec::with_capacity(b * t);
        for &len in &self.lens {
            for j in 0..t {
                mask.push(u8::from(j < len as usize));
            }
        }
        let mask = Tensor::from_vec(mask, (b, 1, t), self.out.device())?;
        Ok((self.out.clone(), mask))
    }

    fn forward_chunk(
        &self,
        xs: &Tensor,
        _offset: usize,
        _required_cache_size: isize,
        att_cache: &Tensor,
        cnn_cache: &Tensor,
    ) -> RnntResult<(Tensor, Tensor, Tensor)> {
        Ok((xs.clone(), att_cache.clone(), cnn_cache.clone()))
    }
}

// ---------------------------------------------------------------------------
// Предиктор
// ---------------------------------------------------------------------------

/// Предиктор с нулевым выходом и счётчиками вызовов.
pub struct CountingPredictor {
    pub dim: usize,
    pub step_calls: Rc<Cell<usize>>,
    pub forward_calls: Rc<Cell<usize>>,
}

impl CountingPredictor {
    pub fn new(dim: usize) -> (Self, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let steps = Rc::new(Cell::new(0));
        let forwards = Rc::new(Cell::new(0));
        (
            Self {
                dim,
                step_calls: steps.clone(),
                forward_calls: forwards.clone(),
            },
            steps,
            forwards,
        )
    }
}

impl Predictor for CountingPredictor {
    fn forward(&self, ys: &Tensor) -> RnntResult<Tensor> {
        self.forward_calls.set(self.forward_calls.get() + 1);
        let (b, l) = ys.dims2()?;
        Ok(Tensor::zeros((b, l, self.dim), DType::F32, ys.device())?)
    }

    fn forward_step(
        &self,
        label: &Tensor,
        _padding: &Tensor,
        state: &PredictorState,
    ) -> RnntResult<(Tensor, PredictorState)> {
        self.step_calls.set(self.step_calls.get() + 1);
        let out = Tensor::zeros((1, 1, self.dim), DType::F32, label.device())?;
        Ok((out, state.clone()))
    }

    fn init_state(&self, batch: usize, _method: StateInitMethod) -> RnntResult<PredictorState> {
        let m = Tensor::zeros((1, batch, self.dim), DType::F32, &device())?;
        let c = Tensor::zeros((1, batch, self.dim), DType::F32, &device())?;
        Ok(PredictorState::new(m, c))
    }
}

// ---------------------------------------------------------------------------
// Joint
// ---------------------------------------------------------------------------

/// Joint, читающий индекс кадра из значения энкодер-шага и
/// возвращающий соответствующую строку logits из таблицы.
///
/// В обычном режиме строка кадра выдаётся один раз, повторные вызовы
/// на том же кадре получают blank-строку (blank = 0) — иначе кадр с
/// меткой эмитил бы её бесконечно. `sticky` выдаёт строку кадра на
/// каждый вызов, что нужно тестам лимита эмиссий.
pub struct TableJoint {
    pub rows: Vec<Vec<f32>>,
    pub sticky: bool,
    pub last_served: Cell<i64>,
    pub calls: Rc<Cell<usize>>,
}

impl TableJoint {
    pub fn new(rows: Vec<Vec<f32>>) -> (Self, Rc<Cell<usize>>) {
        Self::build(rows, false)
    }

    pub fn sticky(rows: Vec<Vec<f32>>) -> (Self, Rc<Cell<usize>>) {
        Self::build(rows, true)
    }

    fn build(rows: Vec<Vec<f32>>, sticky: bool) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                rows,
                sticky,
                last_served: Cell::new(-1),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl JointNetwork for TableJoint {
    fn forward(&self, enc_out: &Tensor, _pred_out: &Tensor) -> RnntResult<Tensor> {
        self.calls.set(self.calls.get() + 1);
        let frame = enc_out.flatten_all()?.to_vec1::<f32>()?[0] as usize;
        let row = if self.sticky || self.last_served.get() != frame as i64 {
            self.last_served.set(frame as i64);
            self.rows[frame].clone()
        } else {
            let mut blank_row = vec![0.0f32; self.rows[frame].len()];
            blank_row[0] = 5.0;
            blank_row
        };
        let len = row.len();
        Ok(Tensor::from_vec(row, (1, 1, len), enc_out.device())?)
    }
}

/// Joint с нулевыми logits правильной формы [B, T, L+1, V] — для путей,
/// где сами значения читает только мок loss-ядра.
pub struct ZeroJoint {
    pub vocab: usize,
}

impl JointNetwork for ZeroJoint {
    fn forward(&self, enc_out: &Tensor, pred_out: &Tensor) -> RnntResult<Tensor> {
        let (b, t, _) = enc_out.dims3()?;
        let l1 = pred_out.dim(1)?;
        Ok(Tensor::zeros(
            (b, t, l1, self.vocab),
            DType::F32,
            enc_out.device(),
        )?)
    }
}

// ---------------------------------------------------------------------------
// CTC-голова
// ---------------------------------------------------------------------------

/// CTC-голова с фиксированным скалярным loss и счётчиком вызовов.
pub struct FixedCtc {
    pub loss: f32,
    pub calls: Rc<Cell<usize>>,
}

impl FixedCtc {
    pub fn new(loss: f32) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                loss,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl CtcHead for FixedCtc {
    fn forward(
        &self,
        encoder_out: &Tensor,
        _encoder_out_lens: &Tensor,
        _text: &Tensor,
        _text_lengths: &Tensor,
    ) -> RnntResult<Tensor> {
        self.calls.set(self.calls.get() + 1);
        Ok(Tensor::new(self.loss, encoder_out.device())?)
    }
}

// ---------------------------------------------------------------------------
// Attention-декодер
// ---------------------------------------------------------------------------

/// Декодер с заранее заданными logits (игнорирует входы).
pub struct StaticAttentionDecoder {
    pub fwd: Tensor,
    pub rev: Tensor,
    pub reverse_capable: bool,
    pub calls: Rc<Cell<usize>>,
}

impl StaticAttentionDecoder {
    pub fn new(fwd: Tensor, rev: Tensor, reverse_capable: bool) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                fwd,
                rev,
                reverse_capable,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl AttentionDecoder for StaticAttentionDecoder {
    fn forward(
        &self,
        _encoder_out: &Tensor,
        _encoder_mask: &Tensor,
        _ys_in: &Tensor,
        _ys_in_lens: &Tensor,
        _r_ys_in: &Tensor,
        _reverse_weight: f32,
    ) -> RnntResult<(Tensor, Tensor)> {
        self.calls.set(self.calls.get() + 1);
        Ok((self.fwd.clone(), self.rev.clone()))
    }

    fn has_reverse_decoder(&self) -> bool {
        self.reverse_capable
    }
}

/// Декодер с нулевыми logits формы [B, L+1, V] по входным меткам.
pub struct ZeroAttentionDecoder {
    pub vocab: usize,
    pub calls: Rc<Cell<usize>>,
}

impl ZeroAttentionDecoder {
    pub fn new(vocab: usize) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                vocab,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl AttentionDecoder for ZeroAttentionDecoder {
    fn forward(
        &self,
        _encoder_out: &Tensor,
        _encoder_mask: &Tensor,
        ys_in: &Tensor,
        _ys_in_lens: &Tensor,
        _r_ys_in: &Tensor,
        _reverse_weight: f32,
    ) -> RnntResult<(Tensor, Tensor)> {
        self.calls.set(self.calls.get() + 1);
        let (b, l1) = ys_in.dims2()?;
        let zeros = Tensor::zeros((b, l1, self.vocab), DType::F32, ys_in.device())?;
        Ok((zeros.clone(), zeros))
    }
}

// ---------------------------------------------------------------------------
// RNN-T loss-ядро
// ---------------------------------------------------------------------------

/// Loss-ядро с фиксированными значениями и счётчиком вызовов.
pub struct FixedLossKernel {
    pub mean: f32,
    pub per_example: Vec<f32>,
    pub calls: Rc<Cell<usize>>,
}

impl FixedLossKernel {
    pub fn new(mean: f32, per_example: Vec<f32>) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                mean,
                per_example,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl TransducerLossKernel for FixedLossKernel {
    fn rnnt_loss(
        &self,
        logits: &Tensor,
        _labels: &Tensor,
        _logit_lengths: &Tensor,
        _label_lengths: &Tensor,
        _blank: u32,
        reduction: LossReduction,
    ) -> RnntResult<Tensor> {
        self.calls.set(self.calls.get() + 1);
        match reduction {
            LossReduction::Mean => Ok(Tensor::new(self.mean, logits.device())?),
            LossReduction::None => Ok(Tensor::from_vec(
                self.per_example.clone(),
                self.per_example.len(),
                logits.device(),
            )?),
        }
    }
}

// ---------------------------------------------------------------------------
// Prefix beam search
// ---------------------------------------------------------------------------

/// Поиск, возвращающий заранее заданный beam и encoder-выход.
pub struct FixedSearch {
    pub beam: Vec<SearchHypothesis>,
    pub encoder_out: Tensor,
    pub calls: Rc<Cell<usize>>,
}

impl FixedSearch {
    pub fn new(beam: Vec<SearchHypothesis>, encoder_out: Tensor) -> (Self, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Self {
                beam,
                encoder_out,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl PrefixBeamSearch for FixedSearch {
    fn prefix_beam_search(
        &self,
        _speech: &Tensor,
        _speech_lengths: &Tensor,
        _decoding_chunk_size: isize,
        _beam_size: usize,
        _num_decoding_left_chunks: isize,
        _ctc_weight: f32,
        _transducer_weight: f32,
    ) -> RnntResult<(Vec<SearchHypothesis>, Tensor)> {
        self.calls.set(self.calls.get() + 1);
        Ok((self.beam.clone(), self.encoder_out.clone()))
    }
}

/// Log-softmax одной строки logits — независимая реализация для
/// ручного подсчёта ожидаемых score в тестах.
pub fn manual_log_probs(row: &[f32]) -> Vec<f32> {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let sum: f32 = row.iter().map(|&v| (v - max).exp()).sum();
    row.iter().map(|&v| v - max - sum.ln()).collect()
}

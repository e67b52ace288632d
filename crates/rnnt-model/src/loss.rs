//! Композиция обучающего loss и label-smoothing критерий.
//!
//! Итоговый loss = transducer_weight * rnnt
//!              + ctc_weight * ctc.sum()
//!              + attention_weight * att.sum().
//! Ветка с нулевым весом не вычисляется вовсе (её forward не вызывается),
//! а в бандле отражается как `None`, не как нулевой скаляр.

use candle_core::{Tensor, D};
use candle_nn::ops::log_softmax;

use rnnt_core::{RnntError, RnntResult};

/// Результат одного обучающего forward: четыре значения loss.
///
/// Модель ничего не логирует и не делает backprop — что делать с
/// значениями, решает вызывающий.
#[derive(Debug)]
pub struct LossBundle {
    /// Итоговый взвешенный loss (скаляр).
    pub loss: Tensor,

    /// Attention loss, `None` если ветка выключена.
    pub loss_att: Option<Tensor>,

    /// CTC loss, `None` если ветка выключена.
    pub loss_ctc: Option<Tensor>,

    /// RNN-T loss (якорный терм, всегда вычисляется).
    pub loss_rnnt: Tensor,
}

/// Label-smoothing KL-критерий для attention-декодера.
///
/// Истинное распределение: `confidence` в целевом токене, остальная
/// масса размазана равномерно по словарю. Позиции с `padding_idx`
/// исключаются из суммы.
#[derive(Debug, Clone)]
pub struct LabelSmoothingLoss {
    size: usize,
    padding_idx: i64,
    confidence: f32,
    smoothing: f32,
    normalize_length: bool,
}

impl LabelSmoothingLoss {
    pub fn new(size: usize, padding_idx: i64, smoothing: f32, normalize_length: bool) -> Self {
        Self {
            size,
            padding_idx,
            confidence: 1.0 - smoothing,
            smoothing,
            normalize_length,
        }
    }

    /// KL(истинное распределение || softmax(logits)).
    ///
    /// `logits` — [B, L, V], `target` — [B, L] (I64 с padding_idx).
    /// Возвращает скалярный тензор: сумма по валидным позициям,
    /// делённая на размер батча (или на число токенов при
    /// `normalize_length`).
    pub fn forward(&self, logits: &Tensor, target: &Tensor) -> RnntResult<Tensor> {
        let (b, l, v) = logits.dims3()?;
        if v != self.size {
            return Err(RnntError::Precondition(format!(
                "словарь logits ({v}) не совпадает с критерием ({})",
                self.size
            )));
        }
        let log_probs = log_softmax(&logits.reshape((b * l, v))?, D::Minus1)?.to_vec2::<f32>()?;
        let targets = target.reshape(b * l)?.to_vec1::<i64>()?;

        let off_value = if v > 1 {
            self.smoothing as f64 / (v - 1) as f64
        } else {
            0.0
        };
        let mut total = 0.0f64;
        let mut tokens = 0usize;
        for (lp, &t) in log_probs.iter().zip(targets.iter()) {
            if t == self.padding_idx {
                continue;
            }
            tokens += 1;
            for (j, &lpj) in lp.iter().enumerate() {
                let p = if j as i64 == t {
                    self.confidence as f64
                } else {
                    off_value
                };
                // xlogy-семантика: нулевая масса не даёт вклада
                if p > 0.0 {
                    total += p * (p.ln() - lpj as f64);
                }
            }
        }
        let denom = if self.normalize_length {
            tokens.max(1)
        } else {
            b
        };
        Ok(Tensor::new((total / denom as f64) as f32, logits.device())?)
    }
}

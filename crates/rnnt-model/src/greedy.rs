//! Frame-synchronous greedy-декодер RNN-T.
//!
//! Алгоритм:
//! 1. Инициализировать состояние предиктора нулями, входной токен = blank
//! 2. Для каждого кадра энкодера:
//!    a. Если предыдущий шаг эмитировал non-blank — обновить предиктор
//!       по последнему эмитированному токену, иначе переиспользовать
//!       кэшированный predictor-выход
//!    b. joint(enc_out[t], pred_out) → logits, k = argmax
//!    c. k != blank: добавить токен к гипотезе, остаться на кадре
//!       (label-synchronous эмиссия в пределах кадра)
//!    d. k == blank или достигнут лимит non-blank на кадр: t += 1
//!
//! Blank по построению никогда не попадает в гипотезу.

use candle_core::{DType, IndexOp, Tensor, D};
use candle_nn::ops::log_softmax;
use tracing::debug;

use rnnt_core::{Hypothesis, JointNetwork, Predictor, RnntResult, StateInitMethod};

use crate::config::GreedySearchConfig;

/// Greedy-декодер: состояние машины декодирования на один утверанс.
pub struct GreedyDecoder {
    blank: u32,
    max_symbols_per_frame: usize,
}

impl GreedyDecoder {
    pub fn new(config: &GreedySearchConfig, blank: u32) -> Self {
        Self {
            blank,
            max_symbols_per_frame: config.max_symbols_per_frame,
        }
    }

    /// Декодировать один утверанс.
    ///
    /// `encoder_out` — [1, T, D], `encoder_out_len` — число валидных кадров.
    /// Score гипотезы — сумма log-вероятностей эмитированных токенов.
    pub fn decode(
        &self,
        encoder_out: &Tensor,
        encoder_out_len: usize,
        predictor: &dyn Predictor,
        joint: &dyn JointNetwork,
    ) -> RnntResult<Hypothesis> {
        let device = encoder_out.device();
        debug!("greedy decode: {} кадров энкодера", encoder_out_len);

        let padding = Tensor::zeros((1, 1), DType::F32, device)?;
        let mut pred_input = Tensor::from_vec(vec![self.blank as i64], (1, 1), device)?;
        let mut state = predictor.init_state(1, StateInitMethod::Zero)?;

        // Первый шаг всегда обновляет предиктор (condition = blank).
        let (mut pred_out, mut pending_state) =
            predictor.forward_step(&pred_input, &padding, &state)?;
        let mut need_refresh = false;

        let mut tokens: Vec<u32> = Vec::new();
        let mut score = 0.0f32;
        let mut t = 0usize;
        let mut per_frame_noblk = 0usize;
        let mut step_count = 0usize;

        while t < encoder_out_len {
            if need_refresh {
                let (out, st) = predictor.forward_step(&pred_input, &padding, &state)?;
                pred_out = out;
                pending_state = st;
                need_refresh = false;
            }

            let enc_step = encoder_out.narrow(1, t, 1)?; // [1, 1, D]
            let joint_out = joint.forward(&enc_step, &pred_out)?; // [1, 1, V]
            let log_probs = log_softmax(&joint_out.squeeze(1)?.squeeze(0)?, D::Minus1)?;
            let best = log_probs.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if step_count < 5 {
                debug!(
                    "greedy step {}: t={}/{}, k={}, noblk={}",
                    step_count, t, encoder_out_len, best, per_frame_noblk
                );
            }
            step_count += 1;

            if best != self.blank {
                score += log_probs.i(best as usize)?.to_scalar::<f32>()?;
                tokens.push(best);
                per_frame_noblk += 1;
                pred_input = Tensor::from_vec(vec![best as i64], (1, 1), device)?;
                // Коммит состояния только на non-blank эмиссии.
                state = pending_state.clone();
                need_refresh = true;
            }

            if best == self.blank || per_frame_noblk >= self.max_symbols_per_frame {
                if per_frame_noblk >= self.max_symbols_per_frame {
                    // Лимит достигнут: кадр сдвигается принудительно,
                    // кэшированный predictor-выход переиспользуется.
                    need_refresh = false;
                }
                t += 1;
                per_frame_noblk = 0;
            }
        }

        debug!("greedy decode: {} токенов гипотезы", tokens.len());
        Ok(Hypothesis::new(tokens, score))
    }
}

//! Слияние score при attention rescoring.
//!
//! Rescoring-оценка гипотезы i:
//! `attn_weight * attn_score[i] + ctc_weight * beam_score[i]
//!  + transducer_weight * (-loss_td[i])`.
//! Attention-score — сумма log-вероятностей каждого истинного токена на
//! своей позиции плюс log-вероятность eos сразу за концом последовательности;
//! при активном reverse-весе прямая и обратная суммы смешиваются линейно.

use serde::{Deserialize, Serialize};

/// Параметры attention rescoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescoringOptions {
    /// Число гипотез beam search (K).
    pub beam_size: usize,

    /// Размер чанка декодирования: `<0` — полный контекст, `0` запрещён.
    pub decoding_chunk_size: isize,

    /// Число левых чанков (`<0` = все).
    pub num_decoding_left_chunks: isize,

    /// Вес right-to-left attention-ветки, в [0, 1].
    pub reverse_weight: f32,

    /// Вес beam-score (CTC-компоненты) в итоговом слиянии.
    pub ctc_weight: f32,

    /// Вес attention-score в итоговом слиянии.
    pub attn_weight: f32,

    /// Вес transducer-score (негированный loss) в итоговом слиянии.
    pub transducer_weight: f32,

    /// Вес CTC-постериора внутри prefix beam search.
    pub search_ctc_weight: f32,

    /// Вес transducer-постериора внутри prefix beam search.
    pub search_transducer_weight: f32,
}

impl Default for RescoringOptions {
    fn default() -> Self {
        Self {
            beam_size: 5,
            decoding_chunk_size: -1,
            num_decoding_left_chunks: -1,
            reverse_weight: 0.0,
            ctc_weight: 0.0,
            attn_weight: 0.0,
            transducer_weight: 0.0,
            search_ctc_weight: 1.0,
            search_transducer_weight: 0.0,
        }
    }
}

/// Прямой attention-score: сумма log-prob токенов плюс eos за концом.
///
/// `log_probs` — строки декодера для одной гипотезы, [L+1][V].
pub(crate) fn forward_attention_score(log_probs: &[Vec<f32>], hyp: &[u32], eos: u32) -> f32 {
    let mut score = 0.0f32;
    for (j, &w) in hyp.iter().enumerate() {
        score += log_probs[j][w as usize];
    }
    score + log_probs[hyp.len()][eos as usize]
}

/// Реверс-score: те же токены по правосторонним позициям.
pub(crate) fn reverse_attention_score(r_log_probs: &[Vec<f32>], hyp: &[u32], eos: u32) -> f32 {
    let n = hyp.len();
    let mut score = 0.0f32;
    for (j, &w) in hyp.iter().enumerate() {
        score += r_log_probs[n - j - 1][w as usize];
    }
    score + r_log_probs[n][eos as usize]
}

/// Линейная смесь прямой и обратной attention-оценки.
pub(crate) fn blend_reverse(forward: f32, reverse: f32, reverse_weight: f32) -> f32 {
    forward * (1.0 - reverse_weight) + reverse * reverse_weight
}

/// Итоговое слияние трёх score одной гипотезы.
pub(crate) fn fuse_scores(
    attn_score: f32,
    beam_score: f32,
    td_loss: f32,
    opts: &RescoringOptions,
) -> f32 {
    attn_score * opts.attn_weight
        + beam_score * opts.ctc_weight
        + (-td_loss) * opts.transducer_weight
}

/// Argmax по score со строгим `>`: при равенстве выигрывает первый индекс.
pub(crate) fn best_index(scores: &[f32]) -> (usize, f32) {
    let mut best = 0usize;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &s) in scores.iter().enumerate() {
        if s > best_score {
            best_score = s;
            best = i;
        }
    }
    (best, best_score)
}

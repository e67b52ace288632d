//! Общие типы данных для транс-дьюсерного декодирования.
//!
//! Содержит базовые структуры, используемые всеми крейтами workspace:
//! гипотезы декодирования, рекуррентное состояние предсказательной сети
//! и параметры loss-редукции.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Гипотеза декодирования
// ---------------------------------------------------------------------------

/// Финализированная гипотеза: последовательность токенов и её score.
///
/// Токены никогда не содержат blank-символ — он фильтруется
/// декодером по построению. Score — log-вероятность (или fused score
/// после rescoring).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Упорядоченная последовательность token ID (без blank и sentinel).
    pub tokens: Vec<u32>,

    /// Кумулятивный score в log-домене.
    pub score: f32,
}

impl Hypothesis {
    /// Создать гипотезу из токенов и score.
    pub fn new(tokens: Vec<u32>, score: f32) -> Self {
        Self { tokens, score }
    }

    /// Пустая гипотеза с нулевым score.
    pub fn empty() -> Self {
        Self {
            tokens: Vec::new(),
            score: 0.0,
        }
    }
}

/// Гипотеза, возвращаемая prefix beam search.
///
/// В отличие от [`Hypothesis`], `hyp` начинается со стартового
/// sentinel-токена — ядро обязано отрезать его перед использованием.
#[derive(Debug, Clone)]
pub struct SearchHypothesis {
    /// Последовательность токенов с ведущим sentinel.
    pub hyp: Vec<u32>,

    /// Fused log-вероятность (CTC + transducer blend поиска).
    pub score: f32,
}

// ---------------------------------------------------------------------------
// Состояние предсказательной сети
// ---------------------------------------------------------------------------

/// Рекуррентное состояние предсказательной сети (memory + cell).
///
/// Состояние передаётся явно: `forward_step` возвращает новое значение,
/// вызывающий цикл декодирования владеет ровно одним состоянием и
/// перезаписывает его сам. Никакой скрытой мутации внутри предиктора.
#[derive(Debug, Clone)]
pub struct PredictorState {
    /// Memory-тензор (аналог hidden state LSTM), [layers, B, H].
    pub m: Tensor,

    /// Cell-тензор, [layers, B, H].
    pub c: Tensor,
}

impl PredictorState {
    /// Создать состояние из пары тензоров.
    pub fn new(m: Tensor, c: Tensor) -> Self {
        Self { m, c }
    }
}

/// Метод инициализации состояния предиктора.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInitMethod {
    /// Нулевые тензоры.
    Zero,
}

// ---------------------------------------------------------------------------
// Редукция RNN-T loss
// ---------------------------------------------------------------------------

/// Режим редукции для RNN-T loss-ядра.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReduction {
    /// Per-example loss, тензор формы [B].
    None,

    /// Скалярное среднее по батчу.
    Mean,
}

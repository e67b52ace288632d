//! Конфигурация транс-дьюсерной модели.

use std::path::Path;

use serde::{Deserialize, Serialize};

use rnnt_core::{RnntError, RnntResult};

fn default_ignore_id() -> i64 {
    -1
}

fn default_transducer_weight() -> f32 {
    1.0
}

fn default_max_symbols() -> usize {
    100
}

/// Корневая конфигурация транс-дьюсера.
///
/// Три веса loss-композиции обязаны в сумме давать ровно 1.0 —
/// проверяется при конструировании модели, см. [`Self::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransducerConfig {
    /// Размер словаря (включая blank и sos/eos).
    pub vocab_size: usize,

    /// ID blank-символа.
    pub blank_id: u32,

    /// Sentinel для padding-позиций в батчах переменной длины.
    /// Никогда не попадает в loss как реальная метка.
    #[serde(default = "default_ignore_id")]
    pub ignore_id: i64,

    /// Вес CTC-ветки в обучающем loss.
    #[serde(default)]
    pub ctc_weight: f32,

    /// Вес transducer-ветки (якорный терм).
    #[serde(default = "default_transducer_weight")]
    pub transducer_weight: f32,

    /// Вес attention-ветки (= 1 - transducer_weight - ctc_weight).
    #[serde(default)]
    pub attention_weight: f32,

    /// Вес right-to-left ветки attention-декодера, в [0, 1].
    #[serde(default)]
    pub reverse_weight: f32,

    /// Label smoothing для attention-критерия.
    #[serde(default)]
    pub lsm_weight: f32,

    /// Нормализовать attention loss по числу токенов вместо батча.
    #[serde(default)]
    pub length_normalized_loss: bool,

    /// Параметры greedy-декодирования.
    #[serde(default)]
    pub greedy: GreedySearchConfig,
}

/// Параметры frame-synchronous greedy-поиска.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreedySearchConfig {
    /// Лимит non-blank эмиссий на один кадр энкодера.
    ///
    /// Страховка от патологических циклов бесконечной эмиссии:
    /// при достижении лимита указатель кадра сдвигается принудительно.
    #[serde(default = "default_max_symbols")]
    pub max_symbols_per_frame: usize,
}

impl Default for GreedySearchConfig {
    fn default() -> Self {
        Self {
            max_symbols_per_frame: default_max_symbols(),
        }
    }
}

impl TransducerConfig {
    /// Загрузить конфигурацию из JSON-файла.
    pub fn from_json_file(path: impl AsRef<Path>) -> RnntResult<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Стартовый sentinel (sos == eos == vocab_size - 1).
    pub fn sos(&self) -> u32 {
        (self.vocab_size - 1) as u32
    }

    /// Конечный sentinel, совпадает с [`Self::sos`].
    pub fn eos(&self) -> u32 {
        self.sos()
    }

    /// Проверка инвариантов конфигурации.
    ///
    /// Нарушение — фатальная ошибка конструирования, не runtime-случай.
    pub fn validate(&self) -> RnntResult<()> {
        if self.vocab_size < 2 {
            return Err(RnntError::Config(format!(
                "vocab_size = {} слишком мал (нужны хотя бы blank и sos/eos)",
                self.vocab_size
            )));
        }
        if self.blank_id as usize >= self.vocab_size {
            return Err(RnntError::Config(format!(
                "blank_id = {} вне словаря размера {}",
                self.blank_id, self.vocab_size
            )));
        }
        if self.blank_id == self.sos() {
            return Err(RnntError::Config(format!(
                "blank_id = {} совпадает с sos/eos",
                self.blank_id
            )));
        }
        let sum = self.transducer_weight + self.ctc_weight + self.attention_weight;
        if sum != 1.0 {
            return Err(RnntError::Config(format!(
                "веса loss обязаны в сумме давать 1.0, получено {sum} \
                 (transducer={}, ctc={}, attention={})",
                self.transducer_weight, self.ctc_weight, self.attention_weight
            )));
        }
        if !(0.0..=1.0).contains(&self.reverse_weight) {
            return Err(RnntError::Config(format!(
                "reverse_weight = {} вне диапазона [0, 1]",
                self.reverse_weight
            )));
        }
        Ok(())
    }
}

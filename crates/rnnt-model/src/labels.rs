//! Утилиты над последовательностями меток.
//!
//! Blank-вставка, sos/eos-обрамление, реверс для right-to-left ветки,
//! переотображение padding-позиций под контракт loss-ядра и подсчёт
//! точности attention-декодера. Все функции работают с I64-тензорами
//! меток формы [B, L], где padding помечен `ignore_id`.

use candle_core::{DType, Device, Tensor, D};

use rnnt_core::RnntResult;

/// Добавить ведущий blank к каждой последовательности.
///
/// Padding-позиции (`ignore_id`) тоже заменяются на blank: предиктор
/// не должен видеть sentinel. Выход — [B, L+1] (I64).
pub fn add_blank(ys_pad: &Tensor, blank: u32, ignore_id: i64) -> RnntResult<Tensor> {
    let (b, l) = ys_pad.dims2()?;
    let rows = ys_pad.to_vec2::<i64>()?;
    let mut out = Vec::with_capacity(b * (l + 1));
    for row in &rows {
        out.push(blank as i64);
        for &v in row {
            out.push(if v == ignore_id { blank as i64 } else { v });
        }
    }
    Ok(Tensor::from_vec(out, (b, l + 1), ys_pad.device())?)
}

/// Обрамить последовательности sos/eos.
///
/// Возвращает `(ys_in, ys_out)` формы [B, L+1]:
/// - `ys_in` = `[sos] + ys`, хвост добит eos;
/// - `ys_out` = `ys + [eos]`, хвост добит `ignore_id`.
pub fn add_sos_eos(
    ys_pad: &Tensor,
    sos: i64,
    eos: i64,
    ignore_id: i64,
) -> RnntResult<(Tensor, Tensor)> {
    let (b, l) = ys_pad.dims2()?;
    let rows = ys_pad.to_vec2::<i64>()?;
    let width = l + 1;
    let mut ys_in = Vec::with_capacity(b * width);
    let mut ys_out = Vec::with_capacity(b * width);
    for row in &rows {
        let seq: Vec<i64> = row.iter().copied().filter(|&v| v != ignore_id).collect();
        ys_in.push(sos);
        ys_in.extend_from_slice(&seq);
        ys_in.resize(ys_in.len() + (width - 1 - seq.len()), eos);
        ys_out.extend_from_slice(&seq);
        ys_out.push(eos);
        ys_out.resize(ys_out.len() + (width - 1 - seq.len()), ignore_id);
    }
    let device = ys_pad.device();
    Ok((
        Tensor::from_vec(ys_in, (b, width), device)?,
        Tensor::from_vec(ys_out, (b, width), device)?,
    ))
}

/// Реверсировать каждую последовательность в пределах её истинной длины.
///
/// Padding-хвост заполняется `pad`. Используется для right-to-left
/// attention-ветки.
pub fn reverse_pad_list(ys_pad: &Tensor, ys_lens: &[usize], pad: i64) -> RnntResult<Tensor> {
    let (b, l) = ys_pad.dims2()?;
    let rows = ys_pad.to_vec2::<i64>()?;
    let mut out = Vec::with_capacity(b * l);
    for (row, &len) in rows.iter().zip(ys_lens.iter()) {
        for j in 0..l {
            if j < len {
                out.push(row[len - j - 1]);
            } else {
                out.push(pad);
            }
        }
    }
    Ok(Tensor::from_vec(out, (b, l), ys_pad.device())?)
}

/// Переотобразить метки под контракт RNN-T loss-ядра.
///
/// Все `ignore_id` становятся нулями (их вклад отсекается length-маской
/// внутри ядра), dtype сужается до U32 — узкого целочисленного типа,
/// который требует loss-примитив.
pub fn remap_pad_for_loss(ys_pad: &Tensor, ignore_id: i64) -> RnntResult<Tensor> {
    let dims = ys_pad.dims().to_vec();
    let flat = ys_pad.flatten_all()?.to_vec1::<i64>()?;
    let out: Vec<u32> = flat
        .iter()
        .map(|&v| if v == ignore_id { 0 } else { v as u32 })
        .collect();
    Ok(Tensor::from_vec(out, dims, ys_pad.device())?)
}

/// Собрать список гипотез в padded I64-тензор [K, max_len].
pub fn pad_hyps_to_tensor(
    hyps: &[Vec<u32>],
    ignore_id: i64,
    device: &Device,
) -> RnntResult<Tensor> {
    let k = hyps.len();
    let max_len = hyps.iter().map(|h| h.len()).max().unwrap_or(0);
    let mut out = Vec::with_capacity(k * max_len);
    for hyp in hyps {
        out.extend(hyp.iter().map(|&t| t as i64));
        out.resize(out.len() + (max_len - hyp.len()), ignore_id);
    }
    Ok(Tensor::from_vec(out, (k, max_len), device)?)
}

/// Длины валидных кадров из маски энкодера [B, 1, T] (U8).
pub fn mask_to_lengths(mask: &Tensor) -> RnntResult<Vec<u32>> {
    let summed = mask.squeeze(1)?.to_dtype(DType::F32)?.sum(D::Minus1)?;
    Ok(summed.to_vec1::<f32>()?.iter().map(|&v| v as u32).collect())
}

/// Точность attention-декодера по argmax, padding игнорируется.
///
/// `pad_outputs` — logits [B*L, V], `pad_targets` — метки [B, L] (I64).
pub fn th_accuracy(
    pad_outputs: &Tensor,
    pad_targets: &Tensor,
    ignore_label: i64,
) -> RnntResult<f32> {
    let preds = pad_outputs.argmax(D::Minus1)?.to_vec1::<u32>()?;
    let targets = pad_targets.flatten_all()?.to_vec1::<i64>()?;
    let mut total = 0usize;
    let mut correct = 0usize;
    for (&p, &t) in preds.iter().zip(targets.iter()) {
        if t == ignore_label {
            continue;
        }
        total += 1;
        if p as i64 == t {
            correct += 1;
        }
    }
    if total == 0 {
        return Ok(0.0);
    }
    Ok(correct as f32 / total as f32)
}

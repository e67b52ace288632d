//! Транс-дьюсерная модель: композиция loss и три пути декодирования.
//!
//! `Transducer` владеет непрозрачными коллабораторами (энкодер,
//! предиктор, joint, опциональные CTC-голова и attention-декодер,
//! RNN-T loss-ядро) и опционально инжектированным prefix beam search.
//! Поиск конструируется один раз при сборке модели и передаётся сюда
//! явно — никакого ленивого глобального состояния.

use candle_core::{DType, Tensor, D};
use candle_nn::ops::log_softmax;
use tracing::{debug, info};

use rnnt_core::{
    AttentionDecoder, CtcHead, Encoder, Hypothesis, JointNetwork, LossReduction, Predictor,
    PredictorState, PrefixBeamSearch, RnntError, RnntResult, StateInitMethod,
    TransducerLossKernel,
};

use crate::config::TransducerConfig;
use crate::greedy::GreedyDecoder;
use crate::labels::{
    add_blank, add_sos_eos, mask_to_lengths, pad_hyps_to_tensor, remap_pad_for_loss,
    reverse_pad_list, th_accuracy,
};
use crate::loss::{LabelSmoothingLoss, LossBundle};
use crate::rescore::{
    best_index, blend_reverse, forward_attention_score, fuse_scores, reverse_attention_score,
    RescoringOptions,
};

/// RNN-T транс-дьюсер с CTC- и attention-вспомогательными ветками.
pub struct Transducer {
    config: TransducerConfig,
    encoder: Box<dyn Encoder>,
    predictor: Box<dyn Predictor>,
    joint: Box<dyn JointNetwork>,
    ctc: Option<Box<dyn CtcHead>>,
    attention_decoder: Option<Box<dyn AttentionDecoder>>,
    loss_kernel: Box<dyn TransducerLossKernel>,
    search: Option<Box<dyn PrefixBeamSearch>>,
    criterion_att: LabelSmoothingLoss,
    /// Производный вес attention-ветки: 1 - transducer_weight - ctc_weight.
    attention_decoder_weight: f32,
    greedy: GreedyDecoder,
}

impl std::fmt::Debug for Transducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transducer")
            .field("config", &self.config)
            .field("attention_decoder_weight", &self.attention_decoder_weight)
            .finish_non_exhaustive()
    }
}

impl Transducer {
    /// Собрать модель из конфигурации и коллабораторов.
    ///
    /// Фатальные конфигурационные ошибки: веса loss не дают в сумме 1.0,
    /// blank совпадает с sos/eos. Beam search инжектируется здесь же и
    /// переиспользуется всеми decode-вызовами.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: TransducerConfig,
        encoder: Box<dyn Encoder>,
        predictor: Box<dyn Predictor>,
        joint: Box<dyn JointNetwork>,
        ctc: Option<Box<dyn CtcHead>>,
        attention_decoder: Option<Box<dyn AttentionDecoder>>,
        loss_kernel: Box<dyn TransducerLossKernel>,
        search: Option<Box<dyn PrefixBeamSearch>>,
    ) -> RnntResult<Self> {
        config.validate()?;
        let attention_decoder_weight = 1.0 - config.transducer_weight - config.ctc_weight;
        let criterion_att = LabelSmoothingLoss::new(
            config.vocab_size,
            config.ignore_id,
            config.lsm_weight,
            config.length_normalized_loss,
        );
        let greedy = GreedyDecoder::new(&config.greedy, config.blank_id);
        info!(
            "Transducer: vocab={}, blank={}, веса td/ctc/attn = {}/{}/{}",
            config.vocab_size,
            config.blank_id,
            config.transducer_weight,
            config.ctc_weight,
            attention_decoder_weight,
        );
        Ok(Self {
            config,
            encoder,
            predictor,
            joint,
            ctc,
            attention_decoder,
            loss_kernel,
            search,
            criterion_att,
            attention_decoder_weight,
            greedy,
        })
    }

    /// Конфигурация модели.
    pub fn config(&self) -> &TransducerConfig {
        &self.config
    }

    // -----------------------------------------------------------------
    // Обучающий loss
    // -----------------------------------------------------------------

    /// Encoder + predictor + joint + композиция loss.
    ///
    /// # Аргументы
    /// * `speech` — фичи, [B, T_in, F].
    /// * `speech_lengths` — [B] (I64).
    /// * `text` — метки с padding `ignore_id`, [B, L] (I64).
    /// * `text_lengths` — [B] (I64).
    pub fn forward(
        &self,
        speech: &Tensor,
        speech_lengths: &Tensor,
        text: &Tensor,
        text_lengths: &Tensor,
    ) -> RnntResult<LossBundle> {
        if text_lengths.dims().len() != 1 {
            return Err(RnntError::Precondition(format!(
                "text_lengths должен быть одномерным, получено {:?}",
                text_lengths.dims()
            )));
        }
        let b = speech.dim(0)?;
        if speech_lengths.dim(0)? != b || text.dim(0)? != b || text_lengths.dim(0)? != b {
            return Err(RnntError::Precondition(format!(
                "несовпадающие размеры батча: speech={b}, speech_lengths={}, text={}, text_lengths={}",
                speech_lengths.dim(0)?,
                text.dim(0)?,
                text_lengths.dim(0)?,
            )));
        }
        let device = speech.device();

        let (encoder_out, encoder_mask) = self.encoder.forward(speech, speech_lengths, 0, -1)?;
        let encoder_out_lens = mask_to_lengths(&encoder_mask)?;

        // Предиктор видит метки с ведущим blank и без ignore-id.
        let ys_in_pad = add_blank(text, self.config.blank_id, self.config.ignore_id)?;
        let predictor_out = self.predictor.forward(&ys_in_pad)?;
        let joint_out = self.joint.forward(&encoder_out, &predictor_out)?;

        // Контракт loss-ядра: U32-метки, ignore-id переотображён в 0.
        let rnnt_text = remap_pad_for_loss(text, self.config.ignore_id)?;
        let rnnt_text_lengths = text_lengths.to_dtype(DType::U32)?;
        let enc_lens = Tensor::from_vec(encoder_out_lens, b, device)?;
        let loss_rnnt = self.loss_kernel.rnnt_loss(
            &joint_out,
            &rnnt_text,
            &enc_lens,
            &rnnt_text_lengths,
            self.config.blank_id,
            LossReduction::Mean,
        )?;

        let mut loss = (&loss_rnnt * self.config.transducer_weight as f64)?;

        // Ветки с нулевым весом пропускаются целиком: их forward не вызывается.
        let loss_att = match &self.attention_decoder {
            Some(decoder) if self.attention_decoder_weight != 0.0 => {
                let (att, acc) = self.calc_att_loss(
                    decoder.as_ref(),
                    &encoder_out,
                    &encoder_mask,
                    text,
                    text_lengths,
                )?;
                debug!("attention accuracy: {acc:.4}");
                Some(att)
            }
            _ => None,
        };
        let loss_ctc = match &self.ctc {
            Some(ctc) if self.config.ctc_weight != 0.0 => {
                Some(ctc.forward(&encoder_out, &enc_lens, text, text_lengths)?)
            }
            _ => None,
        };

        if let Some(ctc) = &loss_ctc {
            loss = (&loss + &(ctc.sum_all()? * self.config.ctc_weight as f64)?)?;
        }
        if let Some(att) = &loss_att {
            loss = (&loss + &(att.sum_all()? * self.attention_decoder_weight as f64)?)?;
        }

        Ok(LossBundle {
            loss,
            loss_att,
            loss_ctc,
            loss_rnnt,
        })
    }

    fn calc_att_loss(
        &self,
        decoder: &dyn AttentionDecoder,
        encoder_out: &Tensor,
        encoder_mask: &Tensor,
        ys_pad: &Tensor,
        ys_pad_lens: &Tensor,
    ) -> RnntResult<(Tensor, f32)> {
        let b = ys_pad.dim(0)?;
        let device = ys_pad.device();
        let sos = self.config.sos() as i64;
        let eos = self.config.eos() as i64;
        let ignore = self.config.ignore_id;

        let (ys_in_pad, ys_out_pad) = add_sos_eos(ys_pad, sos, eos, ignore)?;
        let lens = ys_pad_lens.to_vec1::<i64>()?;
        let ys_in_lens = Tensor::from_vec(
            lens.iter().map(|&v| v + 1).collect::<Vec<i64>>(),
            b,
            device,
        )?;

        // Реверсированные метки для right-to-left ветки.
        let lens_usize: Vec<usize> = lens.iter().map(|&v| v as usize).collect();
        let r_ys_pad = reverse_pad_list(ys_pad, &lens_usize, ignore)?;
        let (r_ys_in_pad, r_ys_out_pad) = add_sos_eos(&r_ys_pad, sos, eos, ignore)?;

        let (decoder_out, r_decoder_out) = decoder.forward(
            encoder_out,
            encoder_mask,
            &ys_in_pad,
            &ys_in_lens,
            &r_ys_in_pad,
            self.config.reverse_weight,
        )?;

        let loss_att = self.criterion_att.forward(&decoder_out, &ys_out_pad)?;
        let loss_att = if self.config.reverse_weight > 0.0 {
            let r_loss_att = self.criterion_att.forward(&r_decoder_out, &r_ys_out_pad)?;
            (&(&loss_att * (1.0 - self.config.reverse_weight) as f64)?
                + &(&r_loss_att * self.config.reverse_weight as f64)?)?
        } else {
            loss_att
        };

        let (bsz, l1, v) = decoder_out.dims3()?;
        let acc_att = th_accuracy(&decoder_out.reshape((bsz * l1, v))?, &ys_out_pad, ignore)?;
        Ok((loss_att, acc_att))
    }

    // -----------------------------------------------------------------
    // Greedy search
    // -----------------------------------------------------------------

    /// Frame-synchronous greedy-декодирование, batch = 1.
    pub fn greedy_search(
        &self,
        speech: &Tensor,
        speech_lengths: &Tensor,
        decoding_chunk_size: isize,
        num_decoding_left_chunks: isize,
    ) -> RnntResult<Hypothesis> {
        if speech.dim(0)? != 1 {
            return Err(RnntError::Precondition(format!(
                "greedy search поддерживает только batch=1, получено {}",
                speech.dim(0)?
            )));
        }
        if speech_lengths.dim(0)? != 1 {
            return Err(RnntError::Precondition(
                "speech_lengths не согласован с батчем speech".into(),
            ));
        }
        if decoding_chunk_size == 0 {
            return Err(RnntError::Precondition(
                "decoding_chunk_size = 0 запрещён на decode-путях".into(),
            ));
        }
        // Потоковый режим пока не поддержан: всегда полный контекст.
        let _ = (decoding_chunk_size, num_decoding_left_chunks);
        let (encoder_out, encoder_mask) = self.encoder.forward(speech, speech_lengths, -1, -1)?;
        let encoder_out_len = mask_to_lengths(&encoder_mask)?[0] as usize;
        self.greedy.decode(
            &encoder_out,
            encoder_out_len,
            self.predictor.as_ref(),
            self.joint.as_ref(),
        )
    }

    // -----------------------------------------------------------------
    // Prefix beam search
    // -----------------------------------------------------------------

    /// Prefix beam search через инжектированный коллаборатор.
    ///
    /// Возвращает лучшую гипотезу с отрезанным стартовым sentinel.
    pub fn beam_search(
        &self,
        speech: &Tensor,
        speech_lengths: &Tensor,
        decoding_chunk_size: isize,
        beam_size: usize,
        num_decoding_left_chunks: isize,
        ctc_weight: f32,
        transducer_weight: f32,
    ) -> RnntResult<Hypothesis> {
        let search = self.require_search()?;
        if decoding_chunk_size == 0 {
            return Err(RnntError::Precondition(
                "decoding_chunk_size = 0 запрещён на decode-путях".into(),
            ));
        }
        let (beam, _encoder_out) = search.prefix_beam_search(
            speech,
            speech_lengths,
            decoding_chunk_size,
            beam_size,
            num_decoding_left_chunks,
            ctc_weight,
            transducer_weight,
        )?;
        let best = beam
            .first()
            .ok_or_else(|| RnntError::Inference("beam search вернул пустой список".into()))?;
        let tokens: Vec<u32> = best.hyp.get(1..).unwrap_or(&[]).to_vec();
        Ok(Hypothesis::new(tokens, best.score))
    }

    // -----------------------------------------------------------------
    // Attention rescoring
    // -----------------------------------------------------------------

    /// Rescoring K гипотез beam search слиянием трёх score.
    ///
    /// Порядок гипотез поиска сохраняется: он используется для
    /// индексированной итерации и детерминированного tie-break
    /// (строгое `>`, выигрывает первое вхождение).
    pub fn transducer_attention_rescoring(
        &self,
        speech: &Tensor,
        speech_lengths: &Tensor,
        opts: &RescoringOptions,
    ) -> RnntResult<Hypothesis> {
        if speech.dim(0)? != 1 || speech_lengths.dim(0)? != 1 {
            return Err(RnntError::Precondition(
                "attention rescoring поддерживает только batch=1".into(),
            ));
        }
        if opts.decoding_chunk_size == 0 {
            return Err(RnntError::Precondition(
                "decoding_chunk_size = 0 запрещён на decode-путях".into(),
            ));
        }
        let decoder = self.attention_decoder.as_ref().ok_or_else(|| {
            RnntError::Config("attention rescoring требует attention-декодер".into())
        })?;
        // Проверка до любых вычислений: реверс-вес без right-to-left
        // ветки — фатальная конфигурационная ошибка.
        if opts.reverse_weight > 0.0 && !decoder.has_reverse_decoder() {
            return Err(RnntError::Config(format!(
                "reverse_weight = {} требует декодер с right-to-left веткой",
                opts.reverse_weight
            )));
        }
        let search = self.require_search()?;
        let device = speech.device();

        let (beam, encoder_out) = search.prefix_beam_search(
            speech,
            speech_lengths,
            opts.decoding_chunk_size,
            opts.beam_size,
            opts.num_decoding_left_chunks,
            opts.search_ctc_weight,
            opts.search_transducer_weight,
        )?;
        if beam.len() != opts.beam_size {
            return Err(RnntError::Precondition(format!(
                "поиск вернул {} гипотез вместо {}",
                beam.len(),
                opts.beam_size
            )));
        }
        debug!("rescoring: {} гипотез", beam.len());

        // Отрезать стартовый sentinel каждой гипотезы.
        let hyps: Vec<Vec<u32>> = beam
            .iter()
            .map(|s| s.hyp.get(1..).unwrap_or(&[]).to_vec())
            .collect();
        let beam_scores: Vec<f32> = beam.iter().map(|s| s.score).collect();
        let k = hyps.len();

        let hyps_pad = pad_hyps_to_tensor(&hyps, self.config.ignore_id, device)?;
        let hyps_pad_blank = add_blank(&hyps_pad, self.config.blank_id, self.config.ignore_id)?;
        let hyps_lens: Vec<u32> = hyps.iter().map(|h| h.len() as u32).collect();

        // Encoder-выход один на утверанс: broadcast на все K гипотез,
        // read-only по контракту.
        let t_len = encoder_out.dim(1)?;
        let encoder_out = encoder_out.repeat((k, 1, 1))?;
        let encoder_mask = Tensor::ones((k, 1, t_len), DType::U8, device)?;
        let xs_in_lens = Tensor::from_vec(vec![t_len as u32; k], k, device)?;

        // 1. Transducer-score: per-hypothesis RNN-T loss без редукции.
        let predictor_out = self.predictor.forward(&hyps_pad_blank)?;
        let joint_out = self.joint.forward(&encoder_out, &predictor_out)?;
        let rnnt_text = remap_pad_for_loss(&hyps_pad, self.config.ignore_id)?;
        let hyps_lens_t = Tensor::from_vec(hyps_lens.clone(), k, device)?;
        let loss_td = self.loss_kernel.rnnt_loss(
            &joint_out,
            &rnnt_text,
            &xs_in_lens,
            &hyps_lens_t,
            self.config.blank_id,
            LossReduction::None,
        )?;
        let td_loss = loss_td.to_vec1::<f32>()?;

        // 2. Attention-score: один forward декодера на весь beam-батч.
        let sos = self.config.sos() as i64;
        let eos = self.config.eos();
        let (hyps_in, _) = add_sos_eos(&hyps_pad, sos, sos, self.config.ignore_id)?;
        let in_lens = Tensor::from_vec(
            hyps_lens.iter().map(|&l| l as i64 + 1).collect::<Vec<i64>>(),
            k,
            device,
        )?;
        let lens_usize: Vec<usize> = hyps_lens.iter().map(|&l| l as usize).collect();
        let r_hyps = reverse_pad_list(&hyps_pad, &lens_usize, self.config.ignore_id)?;
        let (r_hyps_in, _) = add_sos_eos(&r_hyps, sos, sos, self.config.ignore_id)?;

        let (decoder_out, r_decoder_out) = decoder.forward(
            &encoder_out,
            &encoder_mask,
            &hyps_in,
            &in_lens,
            &r_hyps_in,
            opts.reverse_weight,
        )?;
        let decoder_out = log_softmax(&decoder_out, D::Minus1)?.to_vec3::<f32>()?;
        // Реверс-ветка извлекается только при активном весе: при
        // reverse_weight = 0 результат побитово равен forward-only.
        let r_decoder_out = if opts.reverse_weight > 0.0 {
            Some(log_softmax(&r_decoder_out, D::Minus1)?.to_vec3::<f32>()?)
        } else {
            None
        };

        // 3. Слияние и выбор лучшей гипотезы.
        let mut scores = Vec::with_capacity(k);
        for (i, hyp) in hyps.iter().enumerate() {
            let mut attn_score = forward_attention_score(&decoder_out[i], hyp, eos);
            if let Some(r_out) = &r_decoder_out {
                let r_score = reverse_attention_score(&r_out[i], hyp, eos);
                attn_score = blend_reverse(attn_score, r_score, opts.reverse_weight);
            }
            scores.push(fuse_scores(attn_score, beam_scores[i], td_loss[i], opts));
        }
        let (best, best_score) = best_index(&scores);
        info!("rescoring: выбрана гипотеза {best} со score {best_score:.4}");
        Ok(Hypothesis::new(hyps[best].clone(), best_score))
    }

    fn require_search(&self) -> RnntResult<&dyn PrefixBeamSearch> {
        self.search
            .as_deref()
            .ok_or_else(|| RnntError::Config("prefix beam search не сконфигурирован".into()))
    }

    // -----------------------------------------------------------------
    // Экспортируемые потоковые entry points
    // -----------------------------------------------------------------

    /// Один чанк энкодера с кэшами attention/convolution.
    pub fn forward_encoder_chunk(
        &self,
        xs: &Tensor,
        offset: usize,
        required_cache_size: isize,
        att_cache: &Tensor,
        cnn_cache: &Tensor,
    ) -> RnntResult<(Tensor, Tensor, Tensor)> {
        self.encoder
            .forward_chunk(xs, offset, required_cache_size, att_cache, cnn_cache)
    }

    /// Один шаг предиктора с явной передачей состояния.
    pub fn forward_predictor_step(
        &self,
        label: &Tensor,
        state: &PredictorState,
    ) -> RnntResult<(Tensor, PredictorState)> {
        let padding = Tensor::zeros((1, 1), DType::F32, label.device())?;
        self.predictor.forward_step(label, &padding, state)
    }

    /// Один шаг joint-сети.
    pub fn forward_joint_step(&self, enc_out: &Tensor, pred_out: &Tensor) -> RnntResult<Tensor> {
        self.joint.forward(enc_out, pred_out)
    }

    /// Начальное состояние предиктора для batch = 1.
    pub fn forward_predictor_init_state(&self) -> RnntResult<PredictorState> {
        self.predictor.init_state(1, StateInitMethod::Zero)
    }
}

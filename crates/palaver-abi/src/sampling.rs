use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;

/// User-tunable sampling parameters handed to backends after a load.
/// Backends should treat these as *desired* knobs and ignore what they
/// cannot honor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// If true, pick argmax and ignore other stochastic knobs.
    pub greedy: bool,

    pub temperature: Option<f32>, // > 0.0 enables temperature scaling
    pub top_k: Option<u32>,       // >= 1 keeps the K most likely candidates
    pub top_p: Option<f32>,       // (0, 1] nucleus sampling
    pub typical_p: Option<f32>,   // (0, 1] typical sampling
    pub tfs_z: Option<f32>,       // (0, 1] tail-free sampling

    pub repetition_penalty: Option<PenaltyParams>,
    pub penalize_newline: bool,

    pub mirostat: Option<MirostatParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyParams {
    pub last_n: i32, // number of recent tokens to consider; <=0 disables
    pub repeat: f32, // >= 1.0 reduces repetition
    pub frequency: f32,
    pub presence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirostatParams {
    pub tau: f32,
    pub eta: f32,
    /// 1 or 2
    pub version: u8,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            greedy: false,
            temperature: Some(0.8),
            top_k: Some(40),
            top_p: Some(0.95),
            typical_p: None,
            tfs_z: None,
            repetition_penalty: Some(PenaltyParams {
                last_n: 64,
                repeat: 1.1,
                frequency: 0.0,
                presence: 0.0,
            }),
            penalize_newline: false,
            mirostat: None,
        }
    }
}

impl SamplingParams {
    /// Read sampling knobs from a chat config, falling back to defaults for
    /// anything missing or unparsable.
    ///
    /// Keys: `temp`, `top_k`, `top_p`, `typical_p`, `tfs_z`, `repeat_penalty`,
    /// `repeat_last_n`, `frequence_penalty`, `presence_penalty`,
    /// `penalize_nl`, `mirostat`, `mirostat_tau`, `mirostat_eta`.
    pub fn from_config(cfg: &ChatConfig) -> Self {
        let mut p = Self::default();

        if let Some(t) = cfg.f32("temp") {
            p.temperature = Some(t);
            p.greedy = t <= 0.0;
        }
        if let Some(k) = cfg.i64("top_k") {
            p.top_k = u32::try_from(k).ok();
        }
        if let Some(tp) = cfg.f32("top_p") {
            p.top_p = Some(tp);
        }
        p.typical_p = cfg.f32("typical_p").or(p.typical_p);
        p.tfs_z = cfg.f32("tfs_z").or(p.tfs_z);

        if let Some(ref mut pen) = p.repetition_penalty {
            if let Some(r) = cfg.f32("repeat_penalty") {
                pen.repeat = r;
            }
            if let Some(n) = cfg.i64("repeat_last_n") {
                pen.last_n = n as i32;
            }
            if let Some(f) = cfg.f32("frequence_penalty") {
                pen.frequency = f;
            }
            if let Some(pr) = cfg.f32("presence_penalty") {
                pen.presence = pr;
            }
        }
        if let Some(nl) = cfg.bool("penalize_nl") {
            p.penalize_newline = nl;
        }

        let version = cfg
            .i64("mirostat")
            .filter(|v| *v > 0)
            .and_then(|v| u8::try_from(v).ok());
        if let Some(version) = version {
            p.mirostat = Some(MirostatParams {
                tau: cfg.f32("mirostat_tau").unwrap_or(5.0),
                eta: cfg.f32("mirostat_eta").unwrap_or(0.1),
                version,
            });
        }

        p
    }

    /// Resolve conflicting knobs and drop out-of-range values.
    ///
    /// Greedy turns every stochastic knob off. Mirostat replaces the
    /// truncation filters, and `typical_p` replaces `top_p`.
    pub fn normalized(&self) -> Self {
        let mut p = self.clone();

        if p.greedy {
            p.temperature = None;
            p.mirostat = None;
            p.clear_truncation();
            return p;
        }
        if p.mirostat.is_some() {
            p.clear_truncation();
        }
        if p.typical_p.is_some() {
            p.top_p = None;
        }

        p.temperature = p.temperature.filter(|t| *t > 0.0);
        p.top_k = p.top_k.filter(|k| *k >= 1);
        p.top_p = p.top_p.filter(|v| unit_interval(*v));
        p.typical_p = p.typical_p.filter(|v| unit_interval(*v));
        p.tfs_z = p.tfs_z.filter(|v| unit_interval(*v));

        if let Some(pen) = p.repetition_penalty.as_mut() {
            pen.repeat = pen.repeat.max(1.0);
            pen.last_n = pen.last_n.max(0);
        }
        p.mirostat = p
            .mirostat
            .filter(|m| matches!(m.version, 1 | 2) && m.tau > 0.0 && m.eta > 0.0);

        p
    }

    fn clear_truncation(&mut self) {
        self.top_k = None;
        self.top_p = None;
        self.typical_p = None;
        self.tfs_z = None;
    }
}

/// (0, 1]
#[inline]
fn unit_interval(v: f32) -> bool {
    v > 0.0 && v <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_chat_sampling_keys() {
        let cfg = ChatConfig::new()
            .with("temp", 0.2)
            .with("top_k", 12)
            .with("repeat_penalty", "1.3")
            .with("repeat_last_n", 32);
        let p = SamplingParams::from_config(&cfg);
        assert_eq!(p.temperature, Some(0.2));
        assert_eq!(p.top_k, Some(12));
        let pen = p.repetition_penalty.unwrap();
        assert_eq!(pen.repeat, 1.3);
        assert_eq!(pen.last_n, 32);
        assert!(p.mirostat.is_none());
    }

    #[test]
    fn mirostat_disables_truncation_filters() {
        let cfg = ChatConfig::new()
            .with("mirostat", 2)
            .with("mirostat_tau", 4.0);
        let p = SamplingParams::from_config(&cfg).normalized();
        assert_eq!(p.mirostat.as_ref().map(|m| m.version), Some(2));
        assert!(p.top_k.is_none());
        assert!(p.top_p.is_none());
    }

    #[test]
    fn out_of_range_mirostat_version_is_ignored() {
        let cfg = ChatConfig::new().with("mirostat", 258);
        let p = SamplingParams::from_config(&cfg);
        assert!(p.mirostat.is_none());
        assert!(p.normalized().top_k.is_some());

        let cfg = ChatConfig::new().with("mirostat", 3);
        assert!(SamplingParams::from_config(&cfg).normalized().mirostat.is_none());
    }

    #[test]
    fn zero_temperature_is_greedy() {
        let cfg = ChatConfig::new().with("temp", 0.0);
        let p = SamplingParams::from_config(&cfg).normalized();
        assert!(p.greedy);
        assert!(p.temperature.is_none());
    }
}

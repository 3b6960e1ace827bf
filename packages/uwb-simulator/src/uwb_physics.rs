//! uwb_physics.rs — Ranging and signal-strength model
//!
//! For each anchor:
//! 1. True 2D range from the tag
//! 2. Gaussian ranging noise; with probability `nlos_rate` an extra positive
//!    bias (blocked first path reads long, never short)
//! 3. RSSI from the log-distance path-loss model plus shadowing noise

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use thiserror::Error;
use uwb_types::{AnchorMeasurement, AnchorPosition};

use crate::tag_sim::Vec2;

// ── Radio configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// 1σ ranging noise, cm
    pub sigma_cm: f64,
    /// Per-measurement NLOS probability
    pub nlos_rate: f64,
    pub nlos_bias_mean_cm: f64,
    pub nlos_bias_sigma_cm: f64,
    /// RSSI at 1 m, dBm
    pub rssi_at_1m_dbm: f64,
    pub path_loss_exponent: f64,
    /// 1σ shadowing, dB
    pub shadowing_sigma_db: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            sigma_cm: 5.0,
            nlos_rate: 0.05,
            nlos_bias_mean_cm: 30.0,
            nlos_bias_sigma_cm: 10.0,
            rssi_at_1m_dbm: -45.0,
            path_loss_exponent: 2.0,
            shadowing_sigma_db: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RadioError {
    #[error("radio.{name} must be finite and non-negative, got {value}")]
    InvalidSigma { name: &'static str, value: f64 },
    #[error("radio.nlos_rate must be within [0, 1], got {0}")]
    InvalidRate(f64),
    #[error("radio.{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },
}

fn gaussian(name: &'static str, mean: f64, sigma: f64) -> Result<Normal<f64>, RadioError> {
    if !mean.is_finite() {
        return Err(RadioError::NonFinite { name, value: mean });
    }
    if !(sigma.is_finite() && sigma >= 0.0) {
        return Err(RadioError::InvalidSigma { name, value: sigma });
    }
    Normal::new(mean, sigma).map_err(|_| RadioError::InvalidSigma { name, value: sigma })
}

// ── Model ─────────────────────────────────────────────────────────────────────

pub struct RadioModel {
    nlos_rate: f64,
    range_noise: Normal<f64>,
    nlos_bias: Normal<f64>,
    shadowing: Normal<f64>,
    rssi_at_1m_dbm: f64,
    path_loss_exponent: f64,
}

impl RadioModel {
    /// Fails when a σ is negative or non-finite, or `nlos_rate` is outside [0, 1].
    pub fn new(cfg: &RadioConfig) -> Result<Self, RadioError> {
        if !(0.0..=1.0).contains(&cfg.nlos_rate) {
            return Err(RadioError::InvalidRate(cfg.nlos_rate));
        }
        for (name, value) in [
            ("rssi_at_1m_dbm", cfg.rssi_at_1m_dbm),
            ("path_loss_exponent", cfg.path_loss_exponent),
        ] {
            if !value.is_finite() {
                return Err(RadioError::NonFinite { name, value });
            }
        }
        Ok(Self {
            nlos_rate: cfg.nlos_rate,
            range_noise: gaussian("sigma_cm", 0.0, cfg.sigma_cm)?,
            nlos_bias: gaussian("nlos_bias_sigma_cm", cfg.nlos_bias_mean_cm, cfg.nlos_bias_sigma_cm)?,
            shadowing: gaussian("shadowing_sigma_db", 0.0, cfg.shadowing_sigma_db)?,
            rssi_at_1m_dbm: cfg.rssi_at_1m_dbm,
            path_loss_exponent: cfg.path_loss_exponent,
        })
    }

    /// Noise-free RSSI at `distance_cm`. Ranges under 10 cm read as 10 cm.
    pub fn path_loss_rssi(&self, distance_cm: f64) -> f64 {
        let metres = (distance_cm / 100.0).max(0.1);
        self.rssi_at_1m_dbm - 10.0 * self.path_loss_exponent * metres.log10()
    }

    /// One noisy measurement. `nlos_multiplier` scales the NLOS probability.
    pub fn measure(&self, true_distance_cm: f64, nlos_multiplier: f64, rng: &mut impl Rng) -> AnchorMeasurement {
        let p_nlos = self.nlos_rate * nlos_multiplier;
        // NaN multiplier reads as line of sight
        let p_nlos = if p_nlos.is_nan() { 0.0 } else { p_nlos.clamp(0.0, 0.95) };
        let bias = if rng.gen_bool(p_nlos) {
            self.nlos_bias.sample(rng).max(0.0)
        } else {
            0.0
        };
        let distance = (true_distance_cm + self.range_noise.sample(rng) + bias).max(0.0);
        let rssi = self.path_loss_rssi(true_distance_cm) + self.shadowing.sample(rng);
        AnchorMeasurement { distance, rssi }
    }

    /// Measurements to A1..A3 for a tag at `tag`.
    pub fn generate_epoch(
        &self,
        tag: Vec2,
        anchors: &[AnchorPosition; 3],
        nlos_multiplier: f64,
        rng: &mut impl Rng,
    ) -> [AnchorMeasurement; 3] {
        anchors.map(|a| self.measure(a.distance_to(tag.x, tag.y), nlos_multiplier, rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uwb_types::AnchorId;

    fn quiet() -> RadioConfig {
        RadioConfig {
            sigma_cm: 0.0,
            nlos_rate: 0.0,
            shadowing_sigma_db: 0.0,
            ..RadioConfig::default()
        }
    }

    #[test]
    fn noiseless_model_reports_true_range() {
        let model = RadioModel::new(&quiet()).unwrap();
        let anchors = [
            AnchorPosition::new(AnchorId::A1, 15.0, 5.0),
            AnchorPosition::new(AnchorId::A2, 290.0, 5.0),
            AnchorPosition::new(AnchorId::A3, 165.0, 625.0),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let m = model.generate_epoch(Vec2::new(150.0, 300.0), &anchors, 1.0, &mut rng);
        for (meas, anchor) in m.iter().zip(&anchors) {
            assert!((meas.distance - anchor.distance_to(150.0, 300.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn rssi_falls_with_distance() {
        let model = RadioModel::new(&quiet()).unwrap();
        assert!((model.path_loss_rssi(100.0) - -45.0).abs() < 1e-9);
        assert!((model.path_loss_rssi(1000.0) - -65.0).abs() < 1e-9);
        assert_eq!(model.path_loss_rssi(0.0), model.path_loss_rssi(10.0));
    }

    #[test]
    fn nlos_bias_only_lengthens_ranges() {
        let cfg = RadioConfig {
            sigma_cm: 0.0,
            nlos_rate: 1.0,
            ..RadioConfig::default()
        };
        let model = RadioModel::new(&cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut biased = 0;
        for _ in 0..200 {
            let m = model.measure(200.0, 1.0, &mut rng);
            assert!(m.distance >= 200.0);
            if m.distance > 200.0 {
                biased += 1;
            }
        }
        // p is capped at 0.95
        assert!(biased > 150);
    }

    #[test]
    fn ranges_are_never_negative() {
        let cfg = RadioConfig { sigma_cm: 50.0, ..quiet() };
        let model = RadioModel::new(&cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..500 {
            assert!(model.measure(1.0, 1.0, &mut rng).distance >= 0.0);
        }
    }

    #[test]
    fn negative_sigma_is_rejected() {
        let cfg = RadioConfig { sigma_cm: -1.0, ..RadioConfig::default() };
        assert_eq!(
            RadioModel::new(&cfg).err(),
            Some(RadioError::InvalidSigma { name: "sigma_cm", value: -1.0 })
        );

        let cfg = RadioConfig { shadowing_sigma_db: -0.5, ..RadioConfig::default() };
        assert!(matches!(
            RadioModel::new(&cfg),
            Err(RadioError::InvalidSigma { name: "shadowing_sigma_db", .. })
        ));

        let cfg = RadioConfig { nlos_bias_sigma_cm: f64::INFINITY, ..RadioConfig::default() };
        assert!(RadioModel::new(&cfg).is_err());
    }

    #[test]
    fn nlos_rate_outside_unit_interval_is_rejected() {
        for rate in [f64::NAN, -0.1, 1.5] {
            let cfg = RadioConfig { nlos_rate: rate, ..RadioConfig::default() };
            assert!(matches!(RadioModel::new(&cfg), Err(RadioError::InvalidRate(_))));
        }
    }

    #[test]
    fn nan_multiplier_does_not_panic() {
        let model = RadioModel::new(&RadioConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let m = model.measure(150.0, f64::NAN, &mut rng);
        assert!(m.distance.is_finite());
    }
}

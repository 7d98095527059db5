//! Service-time distributions for synthetic requests
//!
//! Each request asks the remote service to spend a synthetic amount of time
//! processing it. The distributions here produce that demand in microseconds.
//!
//! Unlike a self-contained sampler, these distributions do not own a random
//! number generator: the caller passes one into every draw, so a single
//! generator can be shared by many request generators.

use rand::RngCore;
use rand_distr::{Distribution as RandDistribution, Exp, LogNormal};

/// Scale (sigma) of the log-normal service-time distribution
///
/// The location is `ln(mean) - LOGNORMAL_SIGMA`. Existing workload traces were
/// recorded with this parameterisation, so it must not change.
pub const LOGNORMAL_SIGMA: f64 = 2.0;

/// Trait for all service-time distributions
pub trait Distribution: Send {
    /// Sample a value using the caller's random number generator
    fn sample(&self, rng: &mut dyn RngCore) -> f64;

    /// Get distribution name
    fn name(&self) -> &'static str;
}

/// Always returns the same value
#[derive(Debug, Clone, Copy)]
pub struct FixedDistribution {
    value: f64,
}

impl FixedDistribution {
    pub fn new(value: f64) -> anyhow::Result<Self> {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("Fixed value must be finite and >= 0");
        }
        Ok(Self { value })
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Distribution for FixedDistribution {
    fn sample(&self, _rng: &mut dyn RngCore) -> f64 {
        self.value
    }

    fn name(&self) -> &'static str {
        "Fixed"
    }
}

/// Exponential distribution
#[derive(Debug, Clone, Copy)]
pub struct ExponentialDistribution {
    lambda: f64,
    dist: Exp<f64>,
}

impl ExponentialDistribution {
    pub fn new(lambda: f64) -> anyhow::Result<Self> {
        if !lambda.is_finite() || lambda <= 0.0 {
            anyhow::bail!("Exponential lambda must be > 0");
        }
        let dist = Exp::new(lambda)?;
        Ok(Self { lambda, dist })
    }

    /// Exponential distribution with the given mean (rate `1 / mean`)
    pub fn from_mean(mean: f64) -> anyhow::Result<Self> {
        if !mean.is_finite() || mean <= 0.0 {
            anyhow::bail!("Exponential mean must be > 0");
        }
        Self::new(1.0 / mean)
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl Distribution for ExponentialDistribution {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.dist.sample(rng)
    }

    fn name(&self) -> &'static str {
        "Exponential"
    }
}

/// Log-normal distribution
#[derive(Debug, Clone, Copy)]
pub struct LognormalDistribution {
    mu: f64,
    sigma: f64,
    dist: LogNormal<f64>,
}

impl LognormalDistribution {
    pub fn new(mu: f64, sigma: f64) -> anyhow::Result<Self> {
        if !sigma.is_finite() || sigma <= 0.0 {
            anyhow::bail!("Lognormal sigma must be > 0");
        }
        let dist = LogNormal::new(mu, sigma)?;
        Ok(Self { mu, sigma, dist })
    }

    /// Log-normal service times around `mean`, as `(ln(mean) - 2.0, 2.0)`
    pub fn from_mean(mean: f64) -> anyhow::Result<Self> {
        if !mean.is_finite() || mean <= 0.0 {
            anyhow::bail!("Lognormal mean must be > 0");
        }
        Self::new(mean.ln() - LOGNORMAL_SIGMA, LOGNORMAL_SIGMA)
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Distribution for LognormalDistribution {
    fn sample(&self, rng: &mut dyn RngCore) -> f64 {
        self.dist.sample(rng)
    }

    fn name(&self) -> &'static str {
        "Lognormal"
    }
}

//! Receiver clock augmentation
//!
//! A GNSS receiver observes ranges through its own clock, so a tightly-coupled filter has to
//! estimate the receiver clock error $b$ (expressed as a range, m) and its rate $\dot{b}$ (m/s)
//! alongside the inertial state. A platform may carry several receivers with independent
//! clocks; each one is a clock *channel*. With $K$ channels the state and the error state are
//! extended as
//!
//! ```text
//! state       = [base(n), b_0, ḃ_0, b_1, ḃ_1, ..., b_{K-1}, ḃ_{K-1}]
//! error state = [base(p), δb_0, δḃ_0, ..., δb_{K-1}, δḃ_{K-1}]
//! noise       = [base(q), w_b0, w_ḃ0, ..., w_b{K-1}, w_ḃ{K-1}]
//! ```
//!
//! Each channel is modelled in the error dynamics as a pair of first-order Gauss-Markov
//! processes:
//!
//! $$
//! \dot{\delta b} = \delta \dot{b} - \beta_b \delta b + w_b, \quad
//! \dot{\delta \dot{b}} = -\beta_{\dot{b}} \delta \dot{b} + w_{\dot{b}}
//! $$
//!
//! while the nominal clock error is integrated as $b \leftarrow b + \dot{b} \Delta t$.
use std::fmt::{self, Display};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::kalman::ErrorStateModel;
use crate::{Error, IMUData, StateVector};

/// A navigation state extended with `K` receiver clock channels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockAugmentedState<S, const K: usize> {
    /// The wrapped navigation state
    pub base: S,
    clock_error: [f64; K],
    clock_error_rate: [f64; K],
}
impl<S: Display, const K: usize> Display for ClockAugmentedState<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} clocks: [", self.base)?;
        for k in 0..K {
            if k > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "({:.3} m, {:.4} m/s)",
                self.clock_error[k], self.clock_error_rate[k]
            )?;
        }
        write!(f, "]")
    }
}
impl<S: StateVector, const K: usize> ClockAugmentedState<S, K> {
    /// Number of scalar values added by the clock channels
    pub const STATE_VALUES_CLOCK: usize = 2 * K;

    /// Wrap a navigation state; every clock error and rate starts at zero
    pub fn new(base: S) -> ClockAugmentedState<S, K> {
        ClockAugmentedState {
            base,
            clock_error: [0.0; K],
            clock_error_rate: [0.0; K],
        }
    }
    /// Number of clock channels
    pub fn channels(&self) -> usize {
        K
    }
    fn check_channel(channel: usize) -> Result<(), Error> {
        if channel < K {
            Ok(())
        } else {
            Err(Error::InvalidClockChannel {
                channel,
                channels: K,
            })
        }
    }
    /// Clock error of `channel`, m
    pub fn clock_error(&self, channel: usize) -> Result<f64, Error> {
        Self::check_channel(channel)?;
        Ok(self.clock_error[channel])
    }
    pub fn clock_error_mut(&mut self, channel: usize) -> Result<&mut f64, Error> {
        Self::check_channel(channel)?;
        Ok(&mut self.clock_error[channel])
    }
    /// Clock error rate of `channel`, m/s
    pub fn clock_error_rate(&self, channel: usize) -> Result<f64, Error> {
        Self::check_channel(channel)?;
        Ok(self.clock_error_rate[channel])
    }
    pub fn clock_error_rate_mut(&mut self, channel: usize) -> Result<&mut f64, Error> {
        Self::check_channel(channel)?;
        Ok(&mut self.clock_error_rate[channel])
    }
    /// Subtract an estimated clock error block laid out as `[δb_0, δḃ_0, δb_1, ...]`
    fn remove_clock_error(&mut self, delta: &[f64]) {
        for (k, pair) in delta.chunks_exact(2).take(K).enumerate() {
            self.clock_error[k] -= pair[0];
            self.clock_error_rate[k] -= pair[1];
        }
    }
}
impl<S: StateVector, const K: usize> StateVector for ClockAugmentedState<S, K> {
    fn size(&self) -> usize {
        self.base.size() + Self::STATE_VALUES_CLOCK
    }
    /// Even offsets into the clock block are clock errors, odd offsets their rates.
    fn get(&self, index: usize) -> Result<f64, Error> {
        let base_size = self.base.size();
        if index < base_size {
            return self.base.get(index);
        }
        let offset = index - base_size;
        if offset >= Self::STATE_VALUES_CLOCK {
            return Err(Error::InvalidIndex {
                index,
                size: self.size(),
            });
        }
        if offset % 2 == 0 {
            Ok(self.clock_error[offset / 2])
        } else {
            Ok(self.clock_error_rate[offset / 2])
        }
    }
    fn set(&mut self, index: usize, value: f64) -> Result<(), Error> {
        let base_size = self.base.size();
        if index < base_size {
            return self.base.set(index, value);
        }
        let offset = index - base_size;
        if offset >= Self::STATE_VALUES_CLOCK {
            return Err(Error::InvalidIndex {
                index,
                size: self.size(),
            });
        }
        if offset % 2 == 0 {
            self.clock_error[offset / 2] = value;
        } else {
            self.clock_error_rate[offset / 2] = value;
        }
        Ok(())
    }
    /// Integrates each clock error with its rate; the rates themselves are left unchanged.
    fn propagate(&mut self, imu: &IMUData, dt: f64) {
        for k in 0..K {
            self.clock_error[k] += self.clock_error_rate[k] * dt;
        }
        self.base.propagate(imu, dt);
    }
}

/// Gauss-Markov constants of the receiver clock model
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockModelConfig {
    /// Inverse correlation time of the clock error, 1/s
    pub beta_clock_error: f64,
    /// Inverse correlation time of the clock error rate, 1/s
    pub beta_clock_error_rate: f64,
}
impl Default for ClockModelConfig {
    fn default() -> Self {
        ClockModelConfig {
            beta_clock_error: 1.0,
            beta_clock_error_rate: 1.0,
        }
    }
}

/// Error-state model extended with `K` receiver clock channels
#[derive(Clone, Copy, Debug)]
pub struct ClockErrorModel<M, const K: usize> {
    /// Model of the wrapped navigation state
    pub base: M,
    pub beta_clock_error: f64,
    pub beta_clock_error_rate: f64,
}
impl<M: ErrorStateModel, const K: usize> ClockErrorModel<M, K> {
    /// Number of error-state columns added by the clock channels
    pub const P_SIZE_CLOCK_ERROR: usize = 2 * K;
    /// Number of noise inputs added by the clock channels
    pub const Q_SIZE_CLOCK_ERROR: usize = 2 * K;

    pub fn new(base: M, config: &ClockModelConfig) -> ClockErrorModel<M, K> {
        ClockErrorModel {
            base,
            beta_clock_error: config.beta_clock_error,
            beta_clock_error_rate: config.beta_clock_error_rate,
        }
    }
    /// Error-state size of the wrapped model
    pub fn p_size_without_clock_error(&self) -> usize {
        self.base.p_size()
    }
    /// Noise input count of the wrapped model
    pub fn q_size_without_clock_error(&self) -> usize {
        self.base.q_size()
    }
    /// Error-state column of the clock error of `channel`
    pub fn clock_error_column(&self, channel: usize) -> usize {
        self.p_size_without_clock_error() + 2 * channel
    }
    /// Error-state column of the clock error rate of `channel`
    pub fn clock_error_rate_column(&self, channel: usize) -> usize {
        self.clock_error_column(channel) + 1
    }
}
impl<M: ErrorStateModel, const K: usize> ErrorStateModel for ClockErrorModel<M, K> {
    type State = ClockAugmentedState<M::State, K>;

    fn p_size(&self) -> usize {
        self.base.p_size() + Self::P_SIZE_CLOCK_ERROR
    }
    fn q_size(&self) -> usize {
        self.base.q_size() + Self::Q_SIZE_CLOCK_ERROR
    }
    fn get_ab(&self, state: &Self::State, imu: &IMUData) -> (DMatrix<f64>, DMatrix<f64>) {
        let (a_base, b_base) = self.base.get_ab(&state.base, imu);
        let p0 = self.p_size_without_clock_error();
        let q0 = self.q_size_without_clock_error();
        let mut a = DMatrix::<f64>::zeros(self.p_size(), self.p_size());
        let mut b = DMatrix::<f64>::zeros(self.p_size(), self.q_size());
        a.view_mut((0, 0), (p0, p0)).copy_from(&a_base);
        b.view_mut((0, 0), (p0, q0)).copy_from(&b_base);
        for k in 0..K {
            let i = self.clock_error_column(k);
            a[(i, i)] -= self.beta_clock_error;
            a[(i, i + 1)] += 1.0;
            a[(i + 1, i + 1)] -= self.beta_clock_error_rate;
        }
        for k in 0..Self::P_SIZE_CLOCK_ERROR {
            b[(p0 + k, q0 + k)] += 1.0;
        }
        (a, b)
    }
    fn correct_state(&self, state: &mut Self::State, delta_x: &DVector<f64>) {
        let p0 = self.p_size_without_clock_error();
        state.remove_clock_error(&delta_x.as_slice()[p0..p0 + Self::P_SIZE_CLOCK_ERROR]);
        let base_delta = delta_x.rows(0, p0).into_owned();
        self.base.correct_state(&mut state.base, &base_delta);
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectPolicy;

/// Exponential backoff capped at the policy maximum, without jitter:
/// `min(base * 2^attempt, max)`.
pub fn capped_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    2_u32
        .checked_pow(attempt)
        .and_then(|factor| policy.base_delay.checked_mul(factor))
        .map_or(policy.max_delay, |delay| delay.min(policy.max_delay))
}

/// [`capped_delay`] spread by a uniform random fraction of up to
/// `policy.jitter` in either direction.
pub fn jittered_delay<R: Rng + ?Sized>(
    attempt: u32,
    policy: &ReconnectPolicy,
    rng: &mut R,
) -> Duration {
    let capped = capped_delay(attempt, policy);
    if policy.jitter <= 0.0 {
        return capped;
    }
    let jitter = policy.jitter.min(1.0);
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    capped.mul_f64(factor.max(0.0))
}

/// Classification for retry policy.
///
/// Used by the exchange client's retry loop and by the coordinator when it
/// reports an outcome to the circuit breaker.
///
/// # Behavior Summary
///
/// | Class | Retried inside the adapter? | Record Circuit Breaker Failure? |
/// |-------|-----------------------------|--------------------------------|
/// | `Never` | No | Only for permission failures |
/// | `WithBackoff` | Yes, exponential backoff | Yes, once retries are exhausted |
/// | `FailoverWithPenalty` | No | Yes |
/// | `CircuitOpen` | No (source skipped) | No (already recorded) |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - unknown symbol, missing permissions, bad request.
    /// The request is fundamentally invalid and retrying won't help.
    Never,

    /// Transient transport failure (timeout, connection reset, 5xx).
    /// The exchange client retries locally with exponential backoff.
    WithBackoff,

    /// The exchange asked us to slow down (HTTP 429).
    ///
    /// Not retried inside the adapter. The failure is recorded in the
    /// circuit breaker so that repeated throttling takes the source out of
    /// the fan-out pool for a while.
    FailoverWithPenalty,

    /// Circuit breaker is open for this source.
    /// Skip this source until the circuit closes.
    CircuitOpen,
}

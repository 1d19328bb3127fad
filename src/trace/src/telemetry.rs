use opentelemetry::trace::TraceId;
use rand::Rng;

/// Generate a random opentelemetry::trace::TraceId to correlate logs of one reconciliation
pub fn get_trace_id() -> TraceId {
    let mut rng = rand::thread_rng();
    let val: u128 = rng.gen();
    TraceId::from(val)
}

use stratum::{DebugCommand, DebugCommandKind};

/// One debug-trace entry expected after encoding a scene.
#[derive(Debug, Clone)]
pub struct TraceExpectation {
    pub kind: DebugCommandKind,
    /// Substring the entry's label must contain.
    pub label_contains: String,
    /// Human-readable label for failure messages.
    pub label: &'static str,
}

impl TraceExpectation {
    pub fn new(
        kind: DebugCommandKind,
        label_contains: impl Into<String>,
        label: &'static str,
    ) -> Self {
        Self {
            kind,
            label_contains: label_contains.into(),
            label,
        }
    }
}

/// Validates that `expectations` appear in `trace` in order, allowing other
/// entries in between.
///
/// Returns a list of human-readable failure descriptions. An empty list means
/// all expectations passed.
pub fn check_trace(trace: &[DebugCommand], expectations: &[TraceExpectation]) -> Vec<String> {
    let mut failures = Vec::new();
    let mut cursor = 0;

    for expectation in expectations {
        let found = trace[cursor..].iter().position(|command| {
            command.kind == expectation.kind
                && command.label.contains(expectation.label_contains.as_str())
        });
        match found {
            Some(position) => cursor += position + 1,
            None => failures.push(format!(
                "[{}] expected {:?} containing '{}' after entry {} of {}",
                expectation.label,
                expectation.kind,
                expectation.label_contains,
                cursor,
                trace.len(),
            )),
        }
    }

    failures
}

//! Result of submitting a job to the worker.

use serde::{Deserialize, Serialize};

/// Outcome of a job admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub accepted: bool,
}

impl Admission {
    pub fn accepted() -> Self {
        Self { accepted: true }
    }

    pub fn rejected() -> Self {
        Self { accepted: false }
    }

    /// HTTP status an API boundary should answer with:
    /// 202 when the job is processing, 409 when the worker is busy.
    pub fn http_status(&self) -> u16 {
        if self.accepted {
            202
        } else {
            409
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(Admission::accepted().http_status(), 202);
        assert_eq!(Admission::rejected().http_status(), 409);
    }
}

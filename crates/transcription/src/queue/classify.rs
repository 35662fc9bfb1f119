use super::ItemStatus;

/// Failure class of a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Failed,
    NoAuth,
    NoQuota,
}

impl From<FailureKind> for ItemStatus {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Failed => ItemStatus::Failed,
            FailureKind::NoAuth => ItemStatus::NoAuth,
            FailureKind::NoQuota => ItemStatus::NoQuota,
        }
    }
}

/// Maps raw error messages onto failure classes by marker substrings,
/// compared case-insensitively. Quota markers win over auth markers.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    quota_markers: Vec<String>,
    auth_markers: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(quota_markers: &[String], auth_markers: &[String]) -> Self {
        let lower = |markers: &[String]| -> Vec<String> {
            markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect()
        };
        Self {
            quota_markers: lower(quota_markers),
            auth_markers: lower(auth_markers),
        }
    }

    pub fn classify(&self, message: &str) -> FailureKind {
        let message = message.to_lowercase();
        if self.quota_markers.iter().any(|m| message.contains(m.as_str())) {
            FailureKind::NoQuota
        } else if self.auth_markers.iter().any(|m| message.contains(m.as_str())) {
            FailureKind::NoAuth
        } else {
            FailureKind::Failed
        }
    }
}

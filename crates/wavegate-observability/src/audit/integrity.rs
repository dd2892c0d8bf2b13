//! Integrity verification for audit chains

use super::entry::AuditEntry;

/// Running head of an audit chain
#[derive(Debug, Default)]
pub struct IntegrityChain {
    /// Hash of the last entry in the chain
    last_hash: Option<String>,

    /// Total number of entries
    entry_count: u64,
}

impl IntegrityChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a chain read back from storage
    pub fn from_state(last_hash: Option<String>, entry_count: u64) -> Self {
        Self {
            last_hash,
            entry_count,
        }
    }

    /// Hash the next entry must link to
    pub fn previous_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn update(&mut self, entry: &AuditEntry) {
        self.last_hash = Some(entry.entry_hash.clone());
        self.entry_count += 1;
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn head_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }
}

/// Verifies the integrity of audit entries
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Whether an entry's stored hash matches its content
    pub fn verify_entry(entry: &AuditEntry) -> bool {
        entry.compute_hash() == entry.entry_hash
    }

    /// Verifies every hash and every link, stopping at the first break.
    pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerificationResult {
        let mut result = ChainVerificationResult {
            valid: true,
            total_entries: entries.len(),
            verified_entries: 0,
            first_invalid_index: None,
            error_message: None,
        };

        for (i, entry) in entries.iter().enumerate() {
            if !Self::verify_entry(entry) {
                result.fail(i, format!("Entry {} has invalid hash", entry.id));
                return result;
            }

            let expected_prev = match i {
                0 => None,
                _ => Some(entries[i - 1].entry_hash.as_str()),
            };
            if entry.previous_hash.as_deref() != expected_prev {
                result.fail(
                    i,
                    format!(
                        "Entry {} has broken chain link (expected prev: {:?}, got: {:?})",
                        entry.id, expected_prev, entry.previous_hash
                    ),
                );
                return result;
            }

            result.verified_entries = i + 1;
        }

        result
    }
}

/// Result of chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerificationResult {
    pub valid: bool,
    pub total_entries: usize,
    pub verified_entries: usize,
    /// Index of first invalid entry
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}

impl ChainVerificationResult {
    fn fail(&mut self, index: usize, message: String) {
        self.valid = false;
        self.first_invalid_index = Some(index);
        self.error_message = Some(message);
    }
}

use std::collections::HashSet;

/// Student identity and attributes as extracted from an import row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub birth_date: String,
    pub phone: String,
    /// Normalized identity key.
    pub email: String,
    pub career: String,
    pub semester: i64,
}

/// Append-only audit row describing one migration run.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationHistoryEntry {
    pub recorded_at: String,
    pub run_id: String,
    pub label: String,
    pub source_kind: String,
    pub fingerprint: Option<String>,
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub errors: usize,
    pub actor: String,
}

/// Persistence seam the reconciler writes through.
///
/// `begin_student`/`commit_student`/`rollback_student` bracket the insert
/// graph of one student in complete mode. Stores without nested transactions
/// may leave them as no-ops, in which case a mid-student failure leaves the
/// partial inserts in place.
pub trait RecordStore {
    /// Normalized emails of every student already in the store.
    fn existing_emails(&mut self) -> anyhow::Result<HashSet<String>>;

    fn insert_student(&mut self, student: &NewStudent) -> anyhow::Result<i64>;

    fn insert_semester(
        &mut self,
        student_id: i64,
        number: i64,
        year: i64,
        status: &str,
    ) -> anyhow::Result<i64>;

    fn insert_subject(
        &mut self,
        semester_id: i64,
        name: &str,
        final_grade: Option<f64>,
    ) -> anyhow::Result<i64>;

    fn insert_evaluation(
        &mut self,
        subject_id: i64,
        name: &str,
        grade: f64,
        weight: i64,
    ) -> anyhow::Result<i64>;

    fn append_history(&mut self, entry: &MigrationHistoryEntry) -> anyhow::Result<()>;

    fn begin_student(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn commit_student(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn rollback_student(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

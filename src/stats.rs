use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;

use crate::migration::round_2;

const HARDEST_SUBJECTS: i64 = 5;

/// Grade bands, highest first, as `(label, lower bound)`.
const GRADE_BANDS: [(&str, f64); 4] = [
    ("Excelente (18-20)", 18.0),
    ("Bueno (15-17)", 15.0),
    ("Aprobado (10-14)", 10.0),
    ("Reprobado (0-9)", f64::NEG_INFINITY),
];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CareerCount {
    pub career: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SemesterCount {
    pub semester: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CareerAverage {
    pub career: String,
    pub average: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub average: f64,
    pub graded: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub band: &'static str,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_students: i64,
    pub total_subjects: i64,
    pub total_evaluations: i64,
    /// Mean of graded subjects, 0 when nothing is graded.
    pub overall_average: f64,
    pub students_by_career: Vec<CareerCount>,
    pub students_by_semester: Vec<SemesterCount>,
    pub average_by_career: Vec<CareerAverage>,
    pub hardest_subjects: Vec<SubjectAverage>,
    pub grade_distribution: Vec<GradeBand>,
}

fn count(conn: &Connection, table: &str) -> anyhow::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .with_context(|| format!("count {table}"))
}

pub fn dashboard(conn: &Connection) -> anyhow::Result<Dashboard> {
    let overall: Option<f64> = conn
        .query_row(
            "SELECT AVG(final_grade) FROM subjects WHERE final_grade IS NOT NULL",
            [],
            |r| r.get(0),
        )
        .context("overall average")?;

    let students_by_career = conn
        .prepare(
            "SELECT career, COUNT(*) AS n FROM students GROUP BY career ORDER BY n DESC, career",
        )?
        .query_map([], |r| {
            Ok(CareerCount {
                career: r.get(0)?,
                count: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("students by career")?;

    let students_by_semester = conn
        .prepare("SELECT semester, COUNT(*) FROM students GROUP BY semester ORDER BY semester")?
        .query_map([], |r| {
            Ok(SemesterCount {
                semester: r.get(0)?,
                count: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("students by semester")?;

    let average_by_career = conn
        .prepare(
            "SELECT st.career, AVG(sub.final_grade) AS avg
             FROM students st
             JOIN semesters se ON se.student_id = st.id
             JOIN subjects sub ON sub.semester_id = se.id
             WHERE sub.final_grade IS NOT NULL
             GROUP BY st.career
             ORDER BY avg DESC, st.career",
        )?
        .query_map([], |r| {
            Ok(CareerAverage {
                career: r.get(0)?,
                average: round_2(r.get(1)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("average by career")?;

    let hardest_subjects = conn
        .prepare(
            "SELECT name, AVG(final_grade) AS avg, COUNT(*)
             FROM subjects
             WHERE final_grade IS NOT NULL
             GROUP BY name
             ORDER BY avg ASC, name
             LIMIT ?",
        )?
        .query_map([HARDEST_SUBJECTS], |r| {
            Ok(SubjectAverage {
                subject: r.get(0)?,
                average: round_2(r.get(1)?),
                graded: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("hardest subjects")?;

    let grades = conn
        .prepare("SELECT final_grade FROM subjects WHERE final_grade IS NOT NULL")?
        .query_map([], |r| r.get::<_, f64>(0))?
        .collect::<Result<Vec<_>, _>>()
        .context("grade distribution")?;

    Ok(Dashboard {
        total_students: count(conn, "students")?,
        total_subjects: count(conn, "subjects")?,
        total_evaluations: count(conn, "evaluations")?,
        overall_average: overall.map(round_2).unwrap_or(0.0),
        students_by_career,
        students_by_semester,
        average_by_career,
        hardest_subjects,
        grade_distribution: grade_distribution(&grades),
    })
}

/// Counts per band, every band present even when empty.
pub fn grade_distribution(grades: &[f64]) -> Vec<GradeBand> {
    let mut counts = [0i64; GRADE_BANDS.len()];
    for &g in grades {
        if let Some(i) = GRADE_BANDS.iter().position(|(_, lower)| g >= *lower) {
            counts[i] += 1;
        }
    }
    GRADE_BANDS
        .iter()
        .zip(counts)
        .map(|(&(band, _), count)| GradeBand { band, count })
        .collect()
}

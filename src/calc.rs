use serde::Serialize;
use std::cmp::Ordering;

/// A component's normalized share of a course total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contribution {
    /// Ungraded (no mark row / NULL mark) or degenerate max_mark.
    Missing,
    /// mark / max_mark. Deliberately unclamped: out-of-range marks pass
    /// through as-is, write-time validation is the only guard.
    Graded(f64),
}

/// PHP-compatible rounding (half away from zero), 1 decimal place.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// PHP-compatible rounding (half away from zero), 2 decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn normalize_mark(mark: Option<f64>, max_mark: f64) -> Contribution {
    let Some(mark) = mark else {
        return Contribution::Missing;
    };
    if max_mark <= 0.0 {
        return Contribution::Missing;
    }
    Contribution::Graded(mark / max_mark)
}

/// Display percentage for a single mark: `round2(100 * mark / max)`,
/// None when ungraded or max_mark is degenerate.
pub fn percentage_of_max(mark: Option<f64>, max_mark: f64) -> Option<f64> {
    match normalize_mark(mark, max_mark) {
        Contribution::Missing => None,
        Contribution::Graded(frac) => Some(round2(100.0 * frac)),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WeightedPart {
    pub contribution: Contribution,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CourseTotal {
    pub total_mark: f64,
    pub all_marks_given: bool,
}

/// Course total: straight weighted sum over graded components, rounded to
/// 1 decimal. Missing components contribute 0 and do NOT shrink the weight
/// denominator, so a student missing every mark totals 0.0 rather than
/// "ungraded". Not interchangeable with [`component_average`] or
/// [`renormalized_average`], which normalize differently on purpose.
pub fn course_total(parts: &[WeightedPart]) -> CourseTotal {
    let mut sum = 0.0_f64;
    let mut all_marks_given = true;
    for p in parts {
        match p.contribution {
            Contribution::Missing => all_marks_given = false,
            Contribution::Graded(frac) => sum += frac * p.weight,
        }
    }
    CourseTotal {
        total_mark: round1(sum),
        all_marks_given,
    }
}

// B+ has circulated as both 3.33 and 3.36 in older mark sheets; 3.33 is
// the published table and the only value used here.
pub const GPA_B_PLUS: f64 = 3.33;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    APlus,
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    DPlus,
    D,
    DMinus,
    E,
}

impl Grade {
    /// Fixed cutoffs, lower bound inclusive (exactly 90.0 is an A+).
    pub fn from_total(total_mark: f64) -> Grade {
        if total_mark >= 90.0 {
            Grade::APlus
        } else if total_mark >= 80.0 {
            Grade::A
        } else if total_mark >= 75.0 {
            Grade::AMinus
        } else if total_mark >= 70.0 {
            Grade::BPlus
        } else if total_mark >= 65.0 {
            Grade::B
        } else if total_mark >= 60.0 {
            Grade::BMinus
        } else if total_mark >= 55.0 {
            Grade::CPlus
        } else if total_mark >= 50.0 {
            Grade::C
        } else if total_mark >= 45.0 {
            Grade::CMinus
        } else if total_mark >= 40.0 {
            Grade::DPlus
        } else if total_mark >= 35.0 {
            Grade::D
        } else if total_mark >= 30.0 {
            Grade::DMinus
        } else {
            Grade::E
        }
    }

    pub fn gpa_point(self) -> f64 {
        match self {
            Grade::APlus | Grade::A => 4.00,
            Grade::AMinus => 3.67,
            Grade::BPlus => GPA_B_PLUS,
            Grade::B => 3.00,
            Grade::BMinus => 2.67,
            Grade::CPlus => 2.33,
            Grade::C => 2.00,
            Grade::CMinus => 1.67,
            Grade::DPlus => 1.33,
            Grade::D => 1.00,
            Grade::DMinus => 0.67,
            Grade::E => 0.00,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::DPlus => "D+",
            Grade::D => "D",
            Grade::DMinus => "D-",
            Grade::E => "E",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credit-weighted GPA: `round2( sum(point*credits) / sum(credits) )`,
/// 0.00 when the student carries no credit hours.
pub fn student_gpa(courses: &[(f64, f64)]) -> f64 {
    let mut weighted = 0.0_f64;
    let mut credits = 0.0_f64;
    for (point, credit_hours) in courses {
        weighted += point * credit_hours;
        credits += credit_hours;
    }
    if credits > 0.0 {
        round2(weighted / credits)
    } else {
        0.00
    }
}

#[derive(Debug, Clone)]
pub struct CohortTotal {
    pub student_id: String,
    pub total_mark: f64,
}

/// Sorted copy of the cohort: total mark descending, then student id
/// ascending so equal totals rank deterministically.
pub fn rank_cohort(rows: &[CohortTotal]) -> Vec<CohortTotal> {
    let mut ordered = rows.to_vec();
    ordered.sort_by(|a, b| {
        b.total_mark
            .partial_cmp(&a.total_mark)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    ordered
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSummary {
    pub position: usize,
    pub position_text: String,
    pub total_students: usize,
    pub above_count: usize,
    pub below_count: usize,
    pub percentile: i64,
    pub total_mark: f64,
}

/// Focal-student ranking over an already-ordered cohort (see
/// [`rank_cohort`]). None when the student is not in the cohort.
/// Percentile is `round((N - position) / (N - 1) * 100)`; a cohort of one
/// is the 100th percentile.
pub fn ranking_summary(ordered: &[CohortTotal], focal_student_id: &str) -> Option<RankingSummary> {
    let idx = ordered
        .iter()
        .position(|r| r.student_id == focal_student_id)?;
    let n = ordered.len();
    let position = idx + 1;
    let percentile = if n > 1 {
        (((n - position) as f64) / ((n - 1) as f64) * 100.0).round() as i64
    } else {
        100
    };
    Some(RankingSummary {
        position,
        position_text: ordinal_text(position),
        total_students: n,
        above_count: idx,
        below_count: n - position,
        percentile,
        total_mark: ordered[idx].total_mark,
    })
}

/// 1 -> "1st", 2 -> "2nd", 3 -> "3rd", 4 -> "4th"; 11-13 always take "th".
pub fn ordinal_text(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBand {
    pub band: &'static str,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Mark-band histogram over cohort totals. Totals are 1-decimal values, so
/// inclusive band edges cover the whole range.
pub fn distribution_bands(totals: &[f64]) -> Vec<DistributionBand> {
    let bands = [
        ("0-49", 0.0_f64, 49.9_f64),
        ("50-59", 50.0_f64, 59.9_f64),
        ("60-69", 60.0_f64, 69.9_f64),
        ("70-79", 70.0_f64, 79.9_f64),
        ("80-89", 80.0_f64, 89.9_f64),
        ("90-100", 90.0_f64, f64::MAX),
    ];
    bands
        .iter()
        .map(|(band, min, max)| DistributionBand {
            band,
            min: *min,
            max: if *max == f64::MAX { 100.0 } else { *max },
            count: totals.iter().filter(|t| **t >= *min && **t <= *max).count(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentAverage {
    pub average_mark: f64,
    pub graded_count: usize,
    pub ungraded_count: usize,
}

impl ComponentAverage {
    pub fn average_percentage(&self, max_mark: f64) -> Option<f64> {
        if max_mark > 0.0 {
            Some(round2(100.0 * self.average_mark / max_mark))
        } else {
            None
        }
    }
}

/// Class average for one component: mean over students with a non-null
/// mark only. Ungraded students leave the denominator (unlike
/// [`course_total`], where a missing mark still counts against the full
/// weight). None when nobody is graded.
pub fn component_average(marks: &[Option<f64>]) -> Option<ComponentAverage> {
    let mut sum = 0.0_f64;
    let mut graded = 0_usize;
    let mut ungraded = 0_usize;
    for m in marks {
        match m {
            Some(v) => {
                sum += v;
                graded += 1;
            }
            None => ungraded += 1,
        }
    }
    if graded == 0 {
        return None;
    }
    Some(ComponentAverage {
        average_mark: round2(sum / graded as f64),
        graded_count: graded,
        ungraded_count: ungraded,
    })
}

/// Comparison-view overall score: `sum(percentage*weight) / sum(weight)`
/// over graded components only, weights rescaled to that subset. The third
/// aggregation rule, used only in the anonymized comparison set. None when
/// nothing is graded or the graded weights sum to zero or less.
pub fn renormalized_average(parts: &[(Option<f64>, f64)]) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;
    for (pct, weight) in parts {
        if let Some(pct) = pct {
            sum += pct * weight;
            weight_sum += weight;
        }
    }
    if weight_sum > 0.0 {
        Some(round2(sum / weight_sum))
    } else {
        None
    }
}

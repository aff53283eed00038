//! Scoring rubric
//!
//! Parsed replies of the three reviewer calls and the arithmetic that turns
//! them into [`Scores`] and concrete review findings.

use serde::Deserialize;

use super::Scores;

/// Weight of each signal in the objectivity score
pub const WEIGHT_BALANCE: f64 = 0.35;
pub const WEIGHT_CREDIBILITY: f64 = 0.25;
pub const WEIGHT_DIVERSITY: f64 = 0.15;
pub const WEIGHT_QUANTITATIVE: f64 = 0.10;
pub const WEIGHT_CONSISTENCY: f64 = 0.15;

/// Penalty per unsupported claim and its cap
pub const UNSUPPORTED_PENALTY: f64 = 0.05;
pub const MAX_UNSUPPORTED_PENALTY: f64 = 0.15;

/// Claim/source consistency; sources are not fetched, so every claim counts as consistent
const CLAIM_CONSISTENCY: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BiasAnalysis {
    pub one_sided_score: f64,
    pub source_diversity_score: f64,
    pub quantitative_ratio: f64,
    #[serde(default)]
    pub missing_counter_evidence: Vec<String>,
    #[serde(default)]
    pub confirmation_bias_indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceAnalysis {
    pub source_credibility_score: f64,
    #[serde(default)]
    pub weak_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClaimAnalysis {
    #[serde(default)]
    pub unsupported_claims: Vec<String>,
    #[serde(default)]
    pub missing_counter_evidence: Vec<String>,
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn objectivity(bias: &BiasAnalysis, source: &SourceAnalysis, claims: &ClaimAnalysis) -> f64 {
    let weighted = WEIGHT_BALANCE * (1.0 - unit(bias.one_sided_score))
        + WEIGHT_CREDIBILITY * unit(source.source_credibility_score)
        + WEIGHT_DIVERSITY * unit(bias.source_diversity_score)
        + WEIGHT_QUANTITATIVE * unit(bias.quantitative_ratio)
        + WEIGHT_CONSISTENCY * CLAIM_CONSISTENCY;

    let penalty = (UNSUPPORTED_PENALTY * claims.unsupported_claims.len() as f64).min(MAX_UNSUPPORTED_PENALTY);
    unit(weighted * (1.0 - penalty))
}

/// Scores for one draft; `valid_link_fraction` scales source quality
pub fn score(
    bias: &BiasAnalysis,
    source: &SourceAnalysis,
    claims: &ClaimAnalysis,
    valid_link_fraction: f64,
) -> Scores {
    Scores {
        objectivity: objectivity(bias, source, claims),
        bias: unit(bias.one_sided_score),
        source_quality: unit(unit(source.source_credibility_score) * unit(valid_link_fraction)),
    }
}

/// Actionable findings from the three analyses
pub fn recommendations(bias: &BiasAnalysis, source: &SourceAnalysis, claims: &ClaimAnalysis) -> Vec<String> {
    let mut out = Vec::new();

    if bias.one_sided_score > 0.6 {
        out.push(format!(
            "High one-sided score ({:.2}): add alternative perspectives or counter-arguments",
            bias.one_sided_score
        ));
    }
    if bias.source_diversity_score < 0.5 {
        out.push("Low source diversity: include sources representing other viewpoints".to_string());
    }
    if bias.quantitative_ratio < 0.3 {
        out.push("Little quantitative data: back claims with specific numbers and statistics".to_string());
    }
    if source.source_credibility_score < 0.6 {
        out.push("Source quality concerns: prefer primary sources and authoritative publications".to_string());
    }

    let unsupported = claims.unsupported_claims.len();
    if unsupported > 0 {
        out.push(format!(
            "{} unsupported claim(s): add citations or evidence for: {}",
            unsupported,
            claims.unsupported_claims.join("; ")
        ));
    }

    let missing: Vec<&str> = claims
        .missing_counter_evidence
        .iter()
        .chain(&bias.missing_counter_evidence)
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        out.push(format!(
            "{} area(s) need counter-evidence: {}",
            missing.len(),
            missing.join("; ")
        ));
    }

    for indicator in &bias.confirmation_bias_indicators {
        out.push(format!("Possible cherry-picking: {}", indicator));
    }
    for weak in &source.weak_sources {
        out.push(format!("Weak source: {}", weak));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bias(one_sided: f64, diversity: f64, quantitative: f64) -> BiasAnalysis {
        BiasAnalysis {
            one_sided_score: one_sided,
            source_diversity_score: diversity,
            quantitative_ratio: quantitative,
            missing_counter_evidence: Vec::new(),
            confirmation_bias_indicators: Vec::new(),
        }
    }

    fn source(credibility: f64) -> SourceAnalysis {
        SourceAnalysis {
            source_credibility_score: credibility,
            weak_sources: Vec::new(),
        }
    }

    #[test]
    fn test_perfect_report_scores_one() {
        let value = objectivity(&bias(0.0, 1.0, 1.0), &source(1.0), &ClaimAnalysis::default());
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_objectivity() {
        // 0.35*0.8 + 0.25*0.6 + 0.15*0.5 + 0.10*0.2 + 0.15 = 0.675
        let value = objectivity(&bias(0.2, 0.5, 0.2), &source(0.6), &ClaimAnalysis::default());
        assert!((value - 0.675).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_claim_penalty_is_capped() {
        let claims = ClaimAnalysis {
            unsupported_claims: (0..10).map(|i| format!("claim {i}")).collect(),
            missing_counter_evidence: Vec::new(),
        };
        let value = objectivity(&bias(0.0, 1.0, 1.0), &source(1.0), &claims);
        assert!((value - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_source_quality_scaled_by_valid_links() {
        let scores = score(&bias(0.1, 0.9, 0.9), &source(0.8), &ClaimAnalysis::default(), 0.5);
        assert!((scores.source_quality - 0.4).abs() < 1e-9);
        assert!((scores.bias - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_replies_are_clamped() {
        let scores = score(&bias(1.7, -0.2, 0.5), &source(2.0), &ClaimAnalysis::default(), 1.0);
        assert_eq!(scores.bias, 1.0);
        assert_eq!(scores.source_quality, 1.0);
        assert!((0.0..=1.0).contains(&scores.objectivity));
    }

    #[test]
    fn test_recommendations_follow_rules() {
        let mut b = bias(0.7, 0.4, 0.1);
        b.missing_counter_evidence.push("cost of installation".into());
        let claims = ClaimAnalysis {
            unsupported_claims: vec!["Heat pumps never fail".into()],
            missing_counter_evidence: vec![],
        };

        let recs = recommendations(&b, &source(0.5), &claims);

        assert_eq!(recs.len(), 6);
        assert!(recs[0].starts_with("High one-sided score (0.70)"));
        assert!(recs[4].contains("Heat pumps never fail"));
        assert!(recs[5].contains("cost of installation"));
    }

    #[test]
    fn test_balanced_report_has_no_recommendations() {
        let recs = recommendations(&bias(0.1, 0.9, 0.8), &source(0.9), &ClaimAnalysis::default());
        assert!(recs.is_empty());
    }

    #[test]
    fn test_missing_score_key_is_rejected() {
        let parsed: Result<BiasAnalysis, _> = serde_json::from_str(r#"{"one_sided_score": 0.2}"#);
        assert!(parsed.is_err());
    }
}

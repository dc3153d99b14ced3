//! Rule-driven diagnosis report generation.
//!
//! A deterministic function of (prediction, optional patient context) that
//! derives severity and urgency, a confidence-gap analysis, tiered medical
//! recommendations, a differential diagnosis list, and a composite
//! quality-control score. Clinical text is kept in its original Chinese and
//! must be preserved verbatim through JSON persistence.
//!
//! The generator never fails past its boundary: any internal error is
//! converted into a failure payload with `success: false`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{ClassConfig, PathologyError, PsResult};
use crate::domain::{PathologyClass, SeverityLevel, UrgencyLevel};
use crate::inference::predictor::{ConfidenceLevel, PredictionResult, ReliabilityLevel};

/// How certain the diagnosis is, judged from the top-1/top-2 probability gap.
///
/// The gap, not the raw top-1 confidence, is the primary certainty signal: a
/// high top-1 with a close runner-up is clinically ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertaintyLevel {
    HighlyCertain,
    ModeratelyCertain,
    Uncertain,
}

impl CertaintyLevel {
    /// Buckets a top-1/top-2 probability gap.
    pub fn from_gap(gap: f32) -> Self {
        if gap > 0.30 {
            CertaintyLevel::HighlyCertain
        } else if gap > 0.15 {
            CertaintyLevel::ModeratelyCertain
        } else {
            CertaintyLevel::Uncertain
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CertaintyLevel::HighlyCertain => "highly certain",
            CertaintyLevel::ModeratelyCertain => "moderately certain",
            CertaintyLevel::Uncertain => "uncertain",
        }
    }
}

/// Certainty over the differential set: primary probability combined with how
/// many plausible alternatives remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCertainty {
    HighlyCertain,
    ModeratelyCertain,
    NeedsFurtherConfirmation,
}

impl DiagnosticCertainty {
    /// Judged from the primary probability and the differential count.
    pub fn assess(primary_probability: f32, differential_count: usize) -> Self {
        if primary_probability > 0.8 && differential_count < 2 {
            DiagnosticCertainty::HighlyCertain
        } else if primary_probability > 0.6 && differential_count < 4 {
            DiagnosticCertainty::ModeratelyCertain
        } else {
            DiagnosticCertainty::NeedsFurtherConfirmation
        }
    }
}

/// Quality bucket of the composite quality-control score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
        }
    }

    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            QualityLevel::Excellent
        } else if score >= 60 {
            QualityLevel::Good
        } else if score >= 40 {
            QualityLevel::Fair
        } else {
            QualityLevel::Poor
        }
    }
}

/// Priority of a medical recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Routine,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Routine => "routine",
        }
    }
}

/// Spread of the class probability distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionSpread {
    Uniform,
    SlightVariation,
    PronouncedVariation,
}

impl DistributionSpread {
    fn from_std(std: f32) -> Self {
        if std < 0.1 {
            DistributionSpread::Uniform
        } else if std < 0.2 {
            DistributionSpread::SlightVariation
        } else {
            DistributionSpread::PronouncedVariation
        }
    }
}

/// A single actionable recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecommendation {
    pub action: String,
    pub priority: Priority,
    pub description: String,
    pub follow_up: String,
}

/// The primary diagnosis block of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryDiagnosis {
    pub diagnosis: String,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub reliability: ReliabilityLevel,
    pub category: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceRange {
    pub min: f32,
    pub max: f32,
}

/// Statistics over the full class probability vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceAnalysis {
    pub primary_confidence: f32,
    pub mean_confidence: f32,
    pub confidence_std: f32,
    pub confidence_range: ConfidenceRange,
    pub distribution: DistributionSpread,
    /// Gap between the top-1 and top-2 probabilities.
    pub confidence_gap: f32,
    pub certainty_level: CertaintyLevel,
    /// Set when no probability vector was available and the analysis is
    /// limited to the primary confidence.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathologyDescription {
    pub basic_description: String,
    pub detailed_findings: String,
    pub clinical_significance: String,
    pub common_associations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityAssessment {
    pub severity_level: SeverityLevel,
    pub urgency_level: UrgencyLevel,
    pub risk_factors: Vec<String>,
    pub prognosis: String,
    pub monitoring_requirements: Vec<String>,
}

/// One alternative diagnosis with its distinguishing rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialEntry {
    pub diagnosis: String,
    pub probability: f32,
    pub reasoning: String,
    pub key_distinguishing_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialDiagnosis {
    pub differential_diagnoses: Vec<DifferentialEntry>,
    pub total_considered: usize,
    pub confidence_in_primary: f32,
    pub diagnostic_certainty: DiagnosticCertainty,
}

/// Composite quality-control block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityControl {
    /// Additive score in [0, 100].
    pub overall_quality_score: u8,
    pub quality_level: QualityLevel,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    /// The score carries a fixed contribution that assumes adequate image
    /// quality; no inspection is actually performed. Always `false`.
    pub image_quality_inspected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disclaimer {
    pub title: String,
    pub content: String,
    pub version: String,
    pub date: String,
}

impl Disclaimer {
    fn current() -> Self {
        Self {
            title: "免责声明".to_string(),
            content: "本报告仅作为辅助诊断参考，不能替代执业医师的临床判断。最终诊断应由合格的专业医师结合患者的完整临床信息做出。"
                .to_string(),
            version: "1.0".to_string(),
            date: Utc::now().format("%Y-%m-%d").to_string(),
        }
    }
}

/// A complete diagnosis report. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub patient_info: HashMap<String, String>,
    pub image_metadata: HashMap<String, serde_json::Value>,
    pub primary_diagnosis: PrimaryDiagnosis,
    pub confidence_analysis: ConfidenceAnalysis,
    pub pathology_description: PathologyDescription,
    pub severity_assessment: SeverityAssessment,
    pub medical_recommendations: Vec<MedicalRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential_diagnosis: Option<DifferentialDiagnosis>,
    pub quality_control: QualityControl,
    pub disclaimer: Disclaimer,
}

/// Payload returned when report assembly fails internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFailure {
    pub success: bool,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// What the generator hands back: a full report, or a failure payload. It
/// never propagates an error to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportOutcome {
    Report(Box<DiagnosisReport>),
    Failure(ReportFailure),
}

impl ReportOutcome {
    /// The report, when assembly succeeded.
    pub fn report(&self) -> Option<&DiagnosisReport> {
        match self {
            ReportOutcome::Report(report) => Some(report),
            ReportOutcome::Failure(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ReportOutcome::Failure(_))
    }
}

/// Static clinical rule tables.
///
/// Lookups fall back to documented defaults (severity Medium, urgency
/// Routine, generic description text) when a class is absent, so a trimmed
/// table can never make report assembly raise.
#[derive(Debug, Clone)]
pub struct ClinicalTables {
    pub severity: HashMap<PathologyClass, SeverityLevel>,
    pub urgency: HashMap<PathologyClass, UrgencyLevel>,
    pub common_classes: HashSet<PathologyClass>,
    pub findings: HashMap<PathologyClass, &'static str>,
    pub significance: HashMap<PathologyClass, &'static str>,
    pub associations: HashMap<PathologyClass, Vec<&'static str>>,
    pub risk_factors: HashMap<PathologyClass, Vec<&'static str>>,
    pub prognosis: HashMap<PathologyClass, &'static str>,
    pub monitoring: HashMap<PathologyClass, Vec<&'static str>>,
    pub specific_recommendations: HashMap<PathologyClass, Vec<MedicalRecommendation>>,
}

impl Default for ClinicalTables {
    fn default() -> Self {
        use PathologyClass::*;
        use SeverityLevel as S;
        use UrgencyLevel as U;

        let severity = HashMap::from([
            (PulmonaryHemorrhage, S::High),
            (PulmonaryEdema, S::Medium),
            (PulmonaryThrombosis, S::Critical),
            (Pneumonia, S::Medium),
            (CoronaryArteryDisease, S::High),
            (MyocardialFiberRupture, S::High),
            (Myocarditis, S::Medium),
            (CerebralHemorrhage, S::Critical),
            (CerebralEdema, S::Critical),
            (CerebralVascularMalformation, S::High),
            (SubarachnoidHemorrhage, S::High),
            (HepaticSteatosis, S::Low),
            (SplenicArteriolarHyalinosis, S::Medium),
            (GlomerularFibrosis, S::High),
            (Pancreatitis, S::Medium),
        ]);

        let urgency = HashMap::from([
            (PulmonaryHemorrhage, U::Urgent),
            (PulmonaryEdema, U::Urgent),
            (PulmonaryThrombosis, U::Emergency),
            (Pneumonia, U::Urgent),
            (CoronaryArteryDisease, U::Emergency),
            (MyocardialFiberRupture, U::Emergency),
            (Myocarditis, U::Urgent),
            (CerebralHemorrhage, U::Emergency),
            (CerebralEdema, U::Emergency),
            (CerebralVascularMalformation, U::Urgent),
            (SubarachnoidHemorrhage, U::Urgent),
            (HepaticSteatosis, U::Routine),
            (SplenicArteriolarHyalinosis, U::Routine),
            (GlomerularFibrosis, U::Urgent),
            (Pancreatitis, U::Urgent),
        ]);

        let common_classes = HashSet::from([
            Pneumonia,
            CoronaryArteryDisease,
            Pancreatitis,
            HepaticSteatosis,
        ]);

        let findings = HashMap::from([
            (
                PulmonaryHemorrhage,
                "肺泡和间质内红细胞渗出，可伴有含铁血黄素巨噬细胞",
            ),
            (PulmonaryEdema, "肺泡壁增厚，肺泡腔内蛋白性液体，可见心衰细胞"),
            (PulmonaryThrombosis, "血管内纤维素性血栓形成，可见炎症细胞浸润"),
            (Pneumonia, "肺泡壁炎症细胞浸润，肺泡腔内渗出物"),
        ]);

        let significance = HashMap::from([
            (PulmonaryHemorrhage, "可能导致呼吸衰竭，需要紧急处理"),
            (PulmonaryEdema, "提示心功能不全或肺损伤，需要及时干预"),
            (PulmonaryThrombosis, "可导致肺梗死，危及生命"),
            (Pneumonia, "常见感染性疾病，需抗生素治疗"),
        ]);

        let associations = HashMap::from([
            (
                PulmonaryHemorrhage,
                vec!["创伤", "肿瘤", "感染", "凝血功能障碍"],
            ),
            (PulmonaryEdema, vec!["心力衰竭", "肾功能衰竭", "ARDS"]),
            (PulmonaryThrombosis, vec!["深静脉血栓", "长期卧床", "手术"]),
            (Pneumonia, vec!["细菌感染", "病毒感染", "免疫功能低下"]),
        ]);

        let risk_factors = HashMap::from([
            (PulmonaryHemorrhage, vec!["高血压", "抗凝治疗", "肺部肿瘤"]),
            (
                CoronaryArteryDisease,
                vec!["高血压", "糖尿病", "高脂血症", "吸烟"],
            ),
            (CerebralHemorrhage, vec!["高血压", "动脉瘤", "脑血管畸形"]),
            (Pancreatitis, vec!["胆结石", "饮酒", "高脂血症"]),
        ]);

        let prognosis = HashMap::from([
            (PulmonaryHemorrhage, "预后取决于出血量和病因"),
            (CoronaryArteryDisease, "需要长期管理和治疗"),
            (CerebralHemorrhage, "预后较差，可能有后遗症"),
            (HepaticSteatosis, "预后良好，可逆性病变"),
        ]);

        let monitoring = HashMap::from([
            (
                PulmonaryHemorrhage,
                vec!["血氧饱和度", "血红蛋白", "胸部影像学"],
            ),
            (
                CoronaryArteryDisease,
                vec!["心电图", "心肌酶谱", "心脏超声"],
            ),
            (CerebralHemorrhage, vec!["意识状态", "颅内压", "神经影像学"]),
            (Pneumonia, vec!["体温", "血常规", "胸部影像学"]),
        ]);

        let specific_recommendations = HashMap::from([
            (
                PulmonaryThrombosis,
                vec![MedicalRecommendation {
                    action: "抗凝治疗评估".to_string(),
                    priority: Priority::Urgent,
                    description: "评估抗凝治疗的适应症和禁忌症".to_string(),
                    follow_up: "血液科会诊".to_string(),
                }],
            ),
            (
                CoronaryArteryDisease,
                vec![MedicalRecommendation {
                    action: "心脏功能评估".to_string(),
                    priority: Priority::High,
                    description: "进行心电图、心脏超声和心肌酶谱检查".to_string(),
                    follow_up: "心内科会诊".to_string(),
                }],
            ),
        ]);

        Self {
            severity,
            urgency,
            common_classes,
            findings,
            significance,
            associations,
            risk_factors,
            prognosis,
            monitoring,
            specific_recommendations,
        }
    }
}

impl ClinicalTables {
    /// Severity for a class; defaults to Medium when absent.
    pub fn severity_for(&self, class: PathologyClass) -> SeverityLevel {
        self.severity
            .get(&class)
            .copied()
            .unwrap_or(SeverityLevel::Medium)
    }

    /// Urgency for a class; defaults to Routine when absent.
    pub fn urgency_for(&self, class: PathologyClass) -> UrgencyLevel {
        self.urgency
            .get(&class)
            .copied()
            .unwrap_or(UrgencyLevel::Routine)
    }

    pub fn is_common(&self, class: PathologyClass) -> bool {
        self.common_classes.contains(&class)
    }

    fn findings_for(&self, class: PathologyClass) -> String {
        self.findings
            .get(&class)
            .copied()
            .unwrap_or("病理学特征明显")
            .to_string()
    }

    fn significance_for(&self, class: PathologyClass) -> String {
        self.significance
            .get(&class)
            .copied()
            .unwrap_or("具有临床意义")
            .to_string()
    }

    fn associations_for(&self, class: PathologyClass) -> Vec<String> {
        self.associations
            .get(&class)
            .map(|v| v.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    fn risk_factors_for(&self, class: PathologyClass) -> Vec<String> {
        self.risk_factors
            .get(&class)
            .map(|v| v.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    fn prognosis_for(&self, class: PathologyClass) -> String {
        self.prognosis
            .get(&class)
            .copied()
            .unwrap_or("预后因个体差异而异")
            .to_string()
    }

    fn monitoring_for(&self, class: PathologyClass) -> Vec<String> {
        self.monitoring
            .get(&class)
            .map(|v| v.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|| vec!["临床症状观察".to_string()])
    }

    fn specific_recommendations_for(&self, class: PathologyClass) -> Vec<MedicalRecommendation> {
        self.specific_recommendations
            .get(&class)
            .cloned()
            .unwrap_or_default()
    }
}

const ISSUE_LOW_CONFIDENCE: &str = "置信度较低，建议人工复核";
const ISSUE_UNCOMMON_CLASS: &str = "相对少见的病理类型，建议专家确认";

/// Generates diagnosis reports from prediction results.
#[derive(Debug, Clone)]
pub struct DiagnosisReportGenerator {
    classes: Arc<ClassConfig>,
    tables: ClinicalTables,
}

impl DiagnosisReportGenerator {
    /// Creates a generator with the built-in clinical tables.
    pub fn new(classes: Arc<ClassConfig>) -> Self {
        Self::with_tables(classes, ClinicalTables::default())
    }

    /// Creates a generator over caller-supplied tables.
    pub fn with_tables(classes: Arc<ClassConfig>, tables: ClinicalTables) -> Self {
        Self { classes, tables }
    }

    /// Generates a report, or a failure payload when assembly fails.
    ///
    /// This is the public boundary: it never returns an error.
    pub fn generate(
        &self,
        prediction: &PredictionResult,
        patient_info: Option<HashMap<String, String>>,
        image_metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> ReportOutcome {
        match self.try_generate(prediction, patient_info, image_metadata) {
            Ok(report) => ReportOutcome::Report(Box::new(report)),
            Err(e) => {
                warn!(error = %e, "report assembly failed");
                ReportOutcome::Failure(ReportFailure {
                    success: false,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                })
            }
        }
    }

    fn try_generate(
        &self,
        prediction: &PredictionResult,
        patient_info: Option<HashMap<String, String>>,
        image_metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> PsResult<DiagnosisReport> {
        // An absent probability vector degrades the report (no differential,
        // confidence analysis limited to the primary confidence); only a
        // vector of the wrong non-zero length is malformed.
        let probs = &prediction.probabilities;
        if !probs.is_empty() && probs.len() != self.classes.num_classes() {
            return Err(PathologyError::invalid_input(format!(
                "expected {} class probabilities, got {}",
                self.classes.num_classes(),
                probs.len()
            )));
        }
        let has_probabilities = !probs.is_empty();

        let class = prediction.class;
        let confidence = prediction.confidence;
        let now = Utc::now();

        Ok(DiagnosisReport {
            report_id: now.format("DXR_%Y%m%d_%H%M%S").to_string(),
            generated_at: now,
            patient_info: patient_info.unwrap_or_default(),
            image_metadata: image_metadata.unwrap_or_default(),
            primary_diagnosis: PrimaryDiagnosis {
                diagnosis: class.display_name().to_string(),
                confidence,
                confidence_level: ConfidenceLevel::from_confidence(confidence),
                reliability: ReliabilityLevel::from_confidence(confidence),
                category: class.clinical_category().to_string(),
            },
            confidence_analysis: if has_probabilities {
                self.analyze_confidence(confidence, probs)
            } else {
                Self::confidence_without_probabilities(confidence)
            },
            pathology_description: PathologyDescription {
                basic_description: self.classes.description(class).to_string(),
                detailed_findings: self.tables.findings_for(class),
                clinical_significance: self.tables.significance_for(class),
                common_associations: self.tables.associations_for(class),
            },
            severity_assessment: SeverityAssessment {
                severity_level: self.tables.severity_for(class),
                urgency_level: self.tables.urgency_for(class),
                risk_factors: self.tables.risk_factors_for(class),
                prognosis: self.tables.prognosis_for(class),
                monitoring_requirements: self.tables.monitoring_for(class),
            },
            medical_recommendations: self.recommendations(class, confidence),
            differential_diagnosis: has_probabilities.then(|| self.differential(probs, class)),
            quality_control: self.quality_assessment(confidence, class),
            disclaimer: Disclaimer::current(),
        })
    }

    fn analyze_confidence(&self, primary: f32, probs: &[f32]) -> ConfidenceAnalysis {
        let n = probs.len() as f32;
        let mean = probs.iter().sum::<f32>() / n;
        let variance = probs.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / n;
        let std = variance.sqrt();

        let mut sorted = probs.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let gap = sorted[0] - sorted.get(1).copied().unwrap_or(0.0);

        ConfidenceAnalysis {
            primary_confidence: primary,
            mean_confidence: mean,
            confidence_std: std,
            confidence_range: ConfidenceRange {
                min: probs.iter().copied().fold(f32::INFINITY, f32::min),
                max: sorted[0],
            },
            distribution: DistributionSpread::from_std(std),
            confidence_gap: gap,
            certainty_level: CertaintyLevel::from_gap(gap),
            note: None,
        }
    }

    // Without a probability vector only the primary confidence is known.
    fn confidence_without_probabilities(primary: f32) -> ConfidenceAnalysis {
        ConfidenceAnalysis {
            primary_confidence: primary,
            mean_confidence: primary,
            confidence_std: 0.0,
            confidence_range: ConfidenceRange {
                min: primary,
                max: primary,
            },
            distribution: DistributionSpread::Uniform,
            confidence_gap: 0.0,
            certainty_level: CertaintyLevel::Uncertain,
            note: Some("无概率数据".to_string()),
        }
    }

    fn recommendations(
        &self,
        class: PathologyClass,
        confidence: f32,
    ) -> Vec<MedicalRecommendation> {
        let name = class.display_name();
        let tier = if confidence >= 0.8 {
            MedicalRecommendation {
                action: "立即临床确认".to_string(),
                priority: Priority::High,
                description: format!("建议立即进行{name}的临床确认和相关检查"),
                follow_up: "安排专科医生会诊".to_string(),
            }
        } else if confidence >= 0.6 {
            MedicalRecommendation {
                action: "进一步检查".to_string(),
                priority: Priority::Medium,
                description: format!("建议进行进一步的影像学和实验室检查以确认{name}"),
                follow_up: "1-2周内复查".to_string(),
            }
        } else {
            MedicalRecommendation {
                action: "密切观察".to_string(),
                priority: Priority::Routine,
                description: "建议密切观察临床症状变化，必要时重复检查".to_string(),
                follow_up: "定期随访".to_string(),
            }
        };

        let mut recommendations = vec![tier];
        recommendations.extend(self.tables.specific_recommendations_for(class));
        recommendations
    }

    // Top-5 of the remaining classes, then filtered to probability > 0.05.
    fn differential(&self, probs: &[f32], primary: PathologyClass) -> DifferentialDiagnosis {
        let primary_name = primary.display_name();
        let primary_probability = probs.get(primary.index()).copied().unwrap_or(0.0);

        let mut candidates: Vec<(usize, f32)> = probs
            .iter()
            .copied()
            .enumerate()
            .filter(|(i, _)| *i != primary.index())
            .collect();
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let entries: Vec<DifferentialEntry> = candidates
            .into_iter()
            .take(5)
            .filter(|(_, p)| *p > 0.05)
            .filter_map(|(index, probability)| {
                self.classes.class_at(index).map(|class| {
                    let name = class.display_name();
                    DifferentialEntry {
                        diagnosis: name.to_string(),
                        probability,
                        reasoning: format!("临床表现相似，{name}需要与{primary_name}进行鉴别"),
                        key_distinguishing_features: vec![
                            format!("{primary_name}的特征性表现"),
                            format!("{name}的特征性表现"),
                            "影像学差异".to_string(),
                            "实验室检查差异".to_string(),
                        ],
                    }
                })
            })
            .collect();

        DifferentialDiagnosis {
            total_considered: entries.len(),
            diagnostic_certainty: DiagnosticCertainty::assess(primary_probability, entries.len()),
            confidence_in_primary: primary_probability,
            differential_diagnoses: entries,
        }
    }

    fn quality_assessment(&self, confidence: f32, class: PathologyClass) -> QualityControl {
        let mut score: u32 = 0;
        let mut issues = Vec::new();

        if confidence >= 0.9 {
            score += 40;
        } else if confidence >= 0.7 {
            score += 30;
        } else if confidence >= 0.5 {
            score += 20;
        } else {
            issues.push(ISSUE_LOW_CONFIDENCE.to_string());
        }

        if self.tables.is_common(class) {
            score += 30;
        } else {
            issues.push(ISSUE_UNCOMMON_CLASS.to_string());
        }

        // Fixed contribution that assumes adequate image quality; no
        // inspection is performed (image_quality_inspected stays false).
        score += 30;

        let score = score.min(100) as u8;
        let mut recommendations = Vec::new();
        if score < 60 {
            recommendations.push("建议进行人工复核".to_string());
        }
        for issue in &issues {
            if issue.contains("置信度") {
                recommendations.push("考虑获取更高质量的图像样本".to_string());
            } else if issue.contains("少见") {
                recommendations.push("建议相关领域专家会诊".to_string());
            }
        }

        QualityControl {
            overall_quality_score: score,
            quality_level: QualityLevel::from_score(score),
            issues,
            recommendations,
            image_quality_inspected: false,
        }
    }

    /// Renders a compact human-readable summary of a report.
    pub fn summary_text(&self, report: &DiagnosisReport) -> String {
        let primary = &report.primary_diagnosis;
        let severity = &report.severity_assessment;

        let mut summary = format!(
            "诊断报告摘要\n================\n\n主要诊断: {}\n置信度: {:.3} ({})\n可靠性: {}\n\n严重程度: {}\n紧急程度: {}\n\n主要建议:\n",
            primary.diagnosis,
            primary.confidence,
            primary.confidence_level.as_str(),
            primary.reliability.as_str(),
            severity.severity_level.as_str(),
            severity.urgency_level.as_str(),
        );
        for rec in report.medical_recommendations.iter().take(3) {
            summary.push_str(&format!(
                "- {} ({}): {}\n",
                rec.action,
                rec.priority.as_str(),
                rec.description
            ));
        }
        summary.push_str(&format!(
            "\n质量控制: {}",
            report.quality_control.quality_level.as_str()
        ));
        summary
    }

    /// Saves a report as pretty-printed UTF-8 JSON, creating parent
    /// directories as needed. Non-ASCII text is written verbatim.
    pub fn save_report(&self, report: &DiagnosisReport, path: &Path) -> PsResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(report)?)?;
        info!(path = %path.display(), report_id = %report.report_id, "diagnosis report saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NUM_CLASSES;

    fn prediction(class: PathologyClass, probs: Vec<f32>) -> PredictionResult {
        let confidence = probs.get(class.index()).copied().unwrap_or(0.0);
        PredictionResult {
            class,
            class_index: class.index(),
            confidence,
            probabilities: probs,
            top_k: Vec::new(),
            threshold_met: confidence >= 0.5,
            image_shape: (224, 224, 3),
            timestamp: Utc::now(),
        }
    }

    fn generator() -> DiagnosisReportGenerator {
        DiagnosisReportGenerator::new(ClassConfig::with_defaults().into_shared())
    }

    fn concentrated(class: PathologyClass, top: f32) -> Vec<f32> {
        let rest = (1.0 - top) / (NUM_CLASSES - 1) as f32;
        let mut probs = vec![rest; NUM_CLASSES];
        probs[class.index()] = top;
        probs
    }

    #[test]
    fn confident_prediction_is_highly_certain_with_immediate_confirmation() {
        let reporter = generator();
        let mut probs = vec![0.06, 0.04];
        probs.resize(NUM_CLASSES, 0.08 / 13.0);
        probs[0] = 0.82;
        probs[1] = 0.06;
        probs[2] = 0.04;
        let outcome = reporter.generate(
            &prediction(PathologyClass::PulmonaryHemorrhage, probs),
            None,
            None,
        );
        let report = outcome.report().unwrap();

        let analysis = &report.confidence_analysis;
        assert!((analysis.confidence_gap - 0.76).abs() < 1e-5);
        assert_eq!(analysis.certainty_level, CertaintyLevel::HighlyCertain);

        let first = &report.medical_recommendations[0];
        assert_eq!(first.action, "立即临床确认");
        assert_eq!(first.priority, Priority::High);
    }

    #[test]
    fn even_spread_is_uncertain_and_flags_low_confidence() {
        let reporter = generator();
        let mut probs = vec![1.0 / NUM_CLASSES as f32; NUM_CLASSES];
        probs[0] = 0.12;
        probs[1] = 0.11;
        let sum: f32 = probs.iter().sum();
        for p in &mut probs {
            *p /= sum;
        }
        let outcome = reporter.generate(
            &prediction(PathologyClass::PulmonaryHemorrhage, probs),
            None,
            None,
        );
        let report = outcome.report().unwrap();

        assert_eq!(
            report.confidence_analysis.certainty_level,
            CertaintyLevel::Uncertain
        );
        assert!(report
            .quality_control
            .issues
            .iter()
            .any(|i| i.contains("置信度较低")));
    }

    #[test]
    fn differential_excludes_primary_and_respects_limits() {
        let reporter = generator();
        // Enough mass outside the primary that several classes pass 0.05.
        let mut probs = vec![0.03; NUM_CLASSES];
        probs[3] = 0.40; // primary: Pneumonia
        probs[0] = 0.15;
        probs[5] = 0.10;
        probs[7] = 0.08;
        let sum: f32 = probs.iter().sum();
        for p in &mut probs {
            *p /= sum;
        }
        let outcome = reporter.generate(&prediction(PathologyClass::Pneumonia, probs), None, None);
        let report = outcome.report().unwrap();
        let diff = report.differential_diagnosis.as_ref().unwrap();

        assert!(diff.differential_diagnoses.len() <= 5);
        for entry in &diff.differential_diagnoses {
            assert_ne!(entry.diagnosis, "肺炎");
            assert!(entry.probability > 0.05);
        }
        assert_eq!(diff.total_considered, diff.differential_diagnoses.len());
    }

    #[test]
    fn diagnostic_certainty_combines_probability_and_alternatives() {
        assert_eq!(
            DiagnosticCertainty::assess(0.85, 1),
            DiagnosticCertainty::HighlyCertain
        );
        assert_eq!(
            DiagnosticCertainty::assess(0.85, 3),
            DiagnosticCertainty::ModeratelyCertain
        );
        assert_eq!(
            DiagnosticCertainty::assess(0.65, 3),
            DiagnosticCertainty::ModeratelyCertain
        );
        assert_eq!(
            DiagnosticCertainty::assess(0.5, 1),
            DiagnosticCertainty::NeedsFurtherConfirmation
        );
    }

    #[test]
    fn quality_score_bounded_at_confidence_extremes() {
        let reporter = generator();

        let zero = reporter.generate(
            &prediction(
                PathologyClass::CerebralEdema,
                concentrated(PathologyClass::CerebralEdema, 0.0),
            ),
            None,
            None,
        );
        let qc = zero.report().unwrap().quality_control.clone();
        assert!(qc.overall_quality_score <= 100);
        assert_eq!(qc.quality_level, QualityLevel::Poor);
        assert!(!qc.image_quality_inspected);

        let one = reporter.generate(
            &prediction(
                PathologyClass::Pneumonia,
                concentrated(PathologyClass::Pneumonia, 1.0),
            ),
            None,
            None,
        );
        let qc = one.report().unwrap().quality_control.clone();
        assert_eq!(qc.overall_quality_score, 100);
        assert_eq!(qc.quality_level, QualityLevel::Excellent);
        assert!(qc.issues.is_empty());
    }

    #[test]
    fn emptied_tables_fall_back_to_documented_defaults() {
        let mut tables = ClinicalTables::default();
        tables.severity.remove(&PathologyClass::CerebralHemorrhage);
        tables.urgency.remove(&PathologyClass::CerebralHemorrhage);
        let reporter = DiagnosisReportGenerator::with_tables(
            ClassConfig::with_defaults().into_shared(),
            tables,
        );

        let outcome = reporter.generate(
            &prediction(
                PathologyClass::CerebralHemorrhage,
                concentrated(PathologyClass::CerebralHemorrhage, 0.9),
            ),
            None,
            None,
        );
        let severity = &outcome.report().unwrap().severity_assessment;
        assert_eq!(severity.severity_level, SeverityLevel::Medium);
        assert_eq!(severity.urgency_level, UrgencyLevel::Routine);
    }

    #[test]
    fn wrong_length_probabilities_yield_failure_payload() {
        let reporter = generator();
        let outcome = reporter.generate(
            &prediction(PathologyClass::Pneumonia, vec![0.5, 0.3, 0.2]),
            None,
            None,
        );
        assert!(outcome.is_failure());
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"success\":false"));
    }

    #[test]
    fn missing_probabilities_degrade_instead_of_failing() {
        let reporter = generator();
        let mut result = prediction(
            PathologyClass::Pneumonia,
            concentrated(PathologyClass::Pneumonia, 0.85),
        );
        result.probabilities = Vec::new();

        let outcome = reporter.generate(&result, None, None);
        let report = outcome.report().expect("report should still be produced");

        assert!(report.differential_diagnosis.is_none());
        let analysis = &report.confidence_analysis;
        assert_eq!(analysis.note.as_deref(), Some("无概率数据"));
        assert_eq!(analysis.primary_confidence, result.confidence);
        assert_eq!(analysis.certainty_level, CertaintyLevel::Uncertain);
        assert_eq!(report.primary_diagnosis.diagnosis, "肺炎");
        assert!(!report.medical_recommendations.is_empty());
    }

    #[test]
    fn chinese_text_survives_json_round_trip() {
        let reporter = generator();
        let outcome = reporter.generate(
            &prediction(
                PathologyClass::PulmonaryThrombosis,
                concentrated(PathologyClass::PulmonaryThrombosis, 0.9),
            ),
            None,
            None,
        );
        let report = outcome.report().unwrap();
        let json = serde_json::to_string_pretty(report).unwrap();
        assert!(json.contains("肺血栓"));
        assert!(json.contains("免责声明"));
        assert!(json.contains("血液科会诊"));

        let parsed: DiagnosisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.primary_diagnosis.diagnosis, "肺血栓");
    }

    #[test]
    fn save_report_writes_verbatim_utf8() {
        let reporter = generator();
        let outcome = reporter.generate(
            &prediction(
                PathologyClass::Pancreatitis,
                concentrated(PathologyClass::Pancreatitis, 0.85),
            ),
            Some(HashMap::from([(
                "patient_id".to_string(),
                "P-0042".to_string(),
            )])),
            None,
        );
        let report = outcome.report().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/report.json");
        reporter.save_report(report, &path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("胰腺炎"));
        assert!(contents.contains("P-0042"));
    }

    #[test]
    fn summary_text_renders_primary_fields() {
        let reporter = generator();
        let outcome = reporter.generate(
            &prediction(
                PathologyClass::CoronaryArteryDisease,
                concentrated(PathologyClass::CoronaryArteryDisease, 0.92),
            ),
            None,
            None,
        );
        let report = outcome.report().unwrap();
        let summary = reporter.summary_text(report);
        assert!(summary.contains("冠心病"));
        assert!(summary.contains("very high"));
        assert!(summary.contains("心脏功能评估"));
    }

    #[test]
    fn report_id_carries_the_generation_timestamp() {
        let reporter = generator();
        let outcome = reporter.generate(
            &prediction(
                PathologyClass::Pneumonia,
                concentrated(PathologyClass::Pneumonia, 0.9),
            ),
            None,
            None,
        );
        let report = outcome.report().unwrap();
        assert!(report.report_id.starts_with("DXR_"));
        assert_eq!(report.report_id.len(), "DXR_20260101_120000".len());
    }
}

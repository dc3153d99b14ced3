//! The inference pipeline: prediction engine and diagnosis report generator.

pub mod predictor;
pub mod report;

pub use predictor::{
    ApiOutcome, ConfidenceLevel, ModelInfo, PathologyPredictor, PredictOptions, PredictionResult,
    ReliabilityLevel, TopPrediction,
};
pub use report::{
    CertaintyLevel, ClinicalTables, DiagnosisReport, DiagnosisReportGenerator,
    DiagnosticCertainty, MedicalRecommendation, Priority, QualityLevel, ReportOutcome,
};

//! Domain types for histopathology classification.
//!
//! The class set is closed and static: exactly fifteen pathology categories,
//! fixed at build time. Display names and clinical text are Chinese and are
//! preserved verbatim through serialization (no ASCII transliteration).

use serde::{Deserialize, Serialize};

/// Number of pathology classes. The class set is closed; changing it is a
/// code change, not a configuration change.
pub const NUM_CLASSES: usize = 15;

/// One of the fifteen fixed pathology categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathologyClass {
    /// 肺出血
    PulmonaryHemorrhage,
    /// 肺水肿
    PulmonaryEdema,
    /// 肺血栓
    PulmonaryThrombosis,
    /// 肺炎
    Pneumonia,
    /// 肝脂肪变性
    HepaticSteatosis,
    /// 冠心病
    CoronaryArteryDisease,
    /// 脑出血
    CerebralHemorrhage,
    /// 脑水肿
    CerebralEdema,
    /// 脑血管畸形
    CerebralVascularMalformation,
    /// 脑蛛网膜下腔淤血
    SubarachnoidHemorrhage,
    /// 脾小动脉玻璃样改变
    SplenicArteriolarHyalinosis,
    /// 肾小球纤维化
    GlomerularFibrosis,
    /// 心肌纤维断裂
    MyocardialFiberRupture,
    /// 心肌炎
    Myocarditis,
    /// 胰腺炎
    Pancreatitis,
}

impl PathologyClass {
    /// All classes in canonical model-output order.
    pub const ALL: [PathologyClass; NUM_CLASSES] = [
        PathologyClass::PulmonaryHemorrhage,
        PathologyClass::PulmonaryEdema,
        PathologyClass::PulmonaryThrombosis,
        PathologyClass::Pneumonia,
        PathologyClass::HepaticSteatosis,
        PathologyClass::CoronaryArteryDisease,
        PathologyClass::CerebralHemorrhage,
        PathologyClass::CerebralEdema,
        PathologyClass::CerebralVascularMalformation,
        PathologyClass::SubarachnoidHemorrhage,
        PathologyClass::SplenicArteriolarHyalinosis,
        PathologyClass::GlomerularFibrosis,
        PathologyClass::MyocardialFiberRupture,
        PathologyClass::Myocarditis,
        PathologyClass::Pancreatitis,
    ];

    /// Returns the class at the given model-output index.
    pub fn from_index(index: usize) -> Option<PathologyClass> {
        Self::ALL.get(index).copied()
    }

    /// Returns the model-output index of this class.
    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|c| *c == self)
            .unwrap_or_default()
    }

    /// Clinical display name, preserved verbatim from the labelled dataset.
    pub fn display_name(self) -> &'static str {
        match self {
            PathologyClass::PulmonaryHemorrhage => "肺出血",
            PathologyClass::PulmonaryEdema => "肺水肿",
            PathologyClass::PulmonaryThrombosis => "肺血栓",
            PathologyClass::Pneumonia => "肺炎",
            PathologyClass::HepaticSteatosis => "肝脂肪变性",
            PathologyClass::CoronaryArteryDisease => "冠心病",
            PathologyClass::CerebralHemorrhage => "脑出血",
            PathologyClass::CerebralEdema => "脑水肿",
            PathologyClass::CerebralVascularMalformation => "脑血管畸形",
            PathologyClass::SubarachnoidHemorrhage => "脑蛛网膜下腔淤血",
            PathologyClass::SplenicArteriolarHyalinosis => "脾小动脉玻璃样改变",
            PathologyClass::GlomerularFibrosis => "肾小球纤维化",
            PathologyClass::MyocardialFiberRupture => "心肌纤维断裂",
            PathologyClass::Myocarditis => "心肌炎",
            PathologyClass::Pancreatitis => "胰腺炎",
        }
    }

    /// Default textual description of the pathology.
    pub fn default_description(self) -> &'static str {
        match self {
            PathologyClass::PulmonaryHemorrhage => "肺部组织出血，可见红细胞渗出",
            PathologyClass::PulmonaryEdema => "肺部液体积聚，肺泡壁增厚",
            PathologyClass::PulmonaryThrombosis => "血管内血栓形成，阻塞血流",
            PathologyClass::Pneumonia => "肺部炎症反应，炎性细胞浸润",
            PathologyClass::HepaticSteatosis => "肝细胞内脂肪滴积聚",
            PathologyClass::CoronaryArteryDisease => "冠状动脉狭窄或阻塞",
            PathologyClass::CerebralHemorrhage => "脑实质出血，血肿形成",
            PathologyClass::CerebralEdema => "脑组织水肿，压力增高",
            PathologyClass::CerebralVascularMalformation => "血管结构异常，发育异常",
            PathologyClass::SubarachnoidHemorrhage => "蛛网膜下腔血液积聚",
            PathologyClass::SplenicArteriolarHyalinosis => "小动脉壁玻璃样变性",
            PathologyClass::GlomerularFibrosis => "肾小球结构纤维化",
            PathologyClass::MyocardialFiberRupture => "心肌纤维结构破坏",
            PathologyClass::Myocarditis => "心肌组织炎症反应",
            PathologyClass::Pancreatitis => "胰腺组织炎症，水肿坏死",
        }
    }

    /// Clinical category tag for grouping related pathologies.
    pub fn clinical_category(self) -> &'static str {
        match self {
            PathologyClass::PulmonaryHemorrhage
            | PathologyClass::PulmonaryEdema
            | PathologyClass::PulmonaryThrombosis
            | PathologyClass::Pneumonia => "肺部病变",
            PathologyClass::CoronaryArteryDisease
            | PathologyClass::MyocardialFiberRupture
            | PathologyClass::Myocarditis => "心血管病变",
            PathologyClass::CerebralHemorrhage
            | PathologyClass::CerebralEdema
            | PathologyClass::CerebralVascularMalformation
            | PathologyClass::SubarachnoidHemorrhage => "脑部病变",
            PathologyClass::HepaticSteatosis => "肝脏病变",
            PathologyClass::SplenicArteriolarHyalinosis => "脾脏病变",
            PathologyClass::GlomerularFibrosis => "肾脏病变",
            PathologyClass::Pancreatitis => "胰腺病变",
        }
    }
}

impl std::fmt::Display for PathologyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Severity of a diagnosed pathology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityLevel {
    /// Stable string form used in persisted reports.
    pub fn as_str(self) -> &'static str {
        match self {
            SeverityLevel::Low => "low",
            SeverityLevel::Medium => "medium",
            SeverityLevel::High => "high",
            SeverityLevel::Critical => "critical",
        }
    }
}

/// Urgency of follow-up for a diagnosed pathology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Routine,
    Urgent,
    Emergency,
}

impl UrgencyLevel {
    /// Stable string form used in persisted reports.
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyLevel::Routine => "routine",
            UrgencyLevel::Urgent => "urgent",
            UrgencyLevel::Emergency => "emergency",
        }
    }
}

/// Script type, decided by file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptType {
    /// `.py`: run directly by the interpreter
    Python,
    /// `.nba`: YAML manifest describing an analysis
    Nba,
}

impl ScriptType {
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.ends_with(".py") {
            Some(Self::Python)
        } else if name.ends_with(".nba") {
            Some(Self::Nba)
        } else {
            None
        }
    }
}

/// Analysis types a manifest or a processing tool may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisTemplate {
    Mountainsort5,
    Kilosort3,
}

impl AnalysisTemplate {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mountainsort5" => Some(Self::Mountainsort5),
            "kilosort3" => Some(Self::Kilosort3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mountainsort5 => "mountainsort5",
            Self::Kilosort3 => "kilosort3",
        }
    }

    /// Driver script in the analysis scripts directory.
    pub fn driver_file_name(&self) -> String {
        format!("analysis_{}.py", self.as_str())
    }

    /// Whether the template runs on a GPU partition.
    pub fn needs_gpu(&self) -> bool {
        matches!(self, Self::Kilosort3)
    }
}

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    PlainScript,
    /// `.nba` manifest run through its driver
    Analysis(AnalysisTemplate),
    /// Processing job of a sorting tool, reading its recording by URL
    Tool(AnalysisTemplate),
}

impl JobKind {
    pub fn is_analysis(&self) -> bool {
        matches!(self, Self::Analysis(_) | Self::Tool(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_type_from_suffix() {
        assert_eq!(ScriptType::from_file_name("a.py"), Some(ScriptType::Python));
        assert_eq!(ScriptType::from_file_name("sort.nba"), Some(ScriptType::Nba));
        assert_eq!(ScriptType::from_file_name("run.sh"), None);
        assert_eq!(ScriptType::from_file_name("py"), None);
    }

    #[test]
    fn test_templates() {
        assert_eq!(
            AnalysisTemplate::from_name("kilosort3"),
            Some(AnalysisTemplate::Kilosort3)
        );
        assert_eq!(AnalysisTemplate::from_name("kilosort2"), None);
        assert_eq!(
            AnalysisTemplate::Mountainsort5.driver_file_name(),
            "analysis_mountainsort5.py"
        );
        assert!(AnalysisTemplate::Kilosort3.needs_gpu());
        assert!(!AnalysisTemplate::Mountainsort5.needs_gpu());
    }

    #[test]
    fn test_tool_runs_are_analyses() {
        assert!(JobKind::Tool(AnalysisTemplate::Mountainsort5).is_analysis());
        assert!(JobKind::Analysis(AnalysisTemplate::Kilosort3).is_analysis());
        assert!(!JobKind::PlainScript.is_analysis());
    }
}

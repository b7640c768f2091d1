use kiln_utils::ObjectTraversal;
use std::collections::BTreeMap;

mod parsing;

pub const DEFAULT_COMPILE_FLAGS: &[&str] = &["-fPIC", "-shared"];

/// One ordered unit of the build, producing the artifact `lib<name>.so`.
#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct Step {
    #[skip]
    pub name: String,
    pub kind: StepKind,
}

impl Step {
    pub fn artifact_file_name(&self) -> String {
        format!("lib{}.so", self.name)
    }

    /// The dependency whose source tree this step builds in place, if any.
    pub fn consumed_dependency(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Make(make) => Some(&make.project),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub enum StepKind {
    Compile(CompileStep),
    Make(MakeStep),
    CMake(CMakeStep),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Compile(_) => "compile",
            StepKind::Make(_) => "make",
            StepKind::CMake(_) => "cmake",
        }
    }
}

/// Compiles translation units straight into the final artifact.
#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct CompileStep {
    pub flags: Vec<String>,
    pub includes: Vec<String>,
    pub sources: Vec<String>,
}

/// Runs a dependency's own makefile, then collects `artifact` from its tree.
#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct MakeStep {
    pub project: String,
    pub args: Vec<String>,
    /// Candidate names or globs, tried in order; the first that resolves wins.
    pub artifact: Vec<String>,
}

/// Generates a build graph under `<generated>/<scope>` and executes it.
#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct CMakeStep {
    pub source: String,
    pub scope: String,
    pub generator: String,
    pub defines: BTreeMap<String, String>,
    pub artifact: Vec<String>,
}

impl CMakeStep {
    pub const NINJA: &'static str = "Ninja";

    /// Whether the generated graph is executed with ninja directly.
    pub fn uses_ninja(&self) -> bool {
        self.generator == Self::NINJA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_follows_convention() {
        let step = Step {
            name: "tree-sitter-jni".into(),
            kind: StepKind::Compile(CompileStep {
                flags: vec![],
                includes: vec![],
                sources: vec!["a.c".into()],
            }),
        };

        assert_eq!(step.artifact_file_name(), "libtree-sitter-jni.so");
        assert_eq!(step.consumed_dependency(), None);
    }

    #[test]
    fn make_consumes_its_project() {
        let step = Step {
            name: "ts".into(),
            kind: StepKind::Make(MakeStep {
                project: "tree-sitter".into(),
                args: vec![],
                artifact: vec!["libtree-sitter.so.0.0".into()],
            }),
        };

        assert_eq!(step.consumed_dependency(), Some("tree-sitter"));
    }
}

use crate::definition::parsing::{is_single_component, GetNodes, KilnParseError, ParseNode, ProxyMap};
use crate::definition::steps::{
    CMakeStep, CompileStep, MakeStep, Step, StepKind, DEFAULT_COMPILE_FLAGS,
};
use crate::{parse_string_into, parse_string_list_into};
use kdl::KdlNode;
use std::collections::BTreeMap;

impl ParseNode for Step {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut name: Option<String> = None;
        parse_string_into!(input, name, errors, "name of step");

        if let Some(step_name) = &name {
            if !is_single_component(step_name) {
                errors.push(KilnParseError {
                    span: *input.span(),
                    label: None,
                    help: Some("the name becomes lib<name>.so in the native directory".into()),
                    kind: "step name must be a single path component",
                });
                name = None;
            }
        }

        let (kind, err) = StepKind::parse_node_with_errors(input);
        errors.extend(err);

        match (name, kind) {
            (Some(name), Some(kind)) => (Some(Step { name, kind }), errors),
            _ => (None, errors),
        }
    }
}

impl ParseNode for StepKind {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        match input.name().value() {
            "compile" => CompileStep::parse_node_with_errors(input).map(StepKind::Compile),
            "make" => MakeStep::parse_node_with_errors(input).map(StepKind::Make),
            "cmake" => CMakeStep::parse_node_with_errors(input).map(StepKind::CMake),
            _ => (
                None,
                vec![KilnParseError::at(input.name().span(), "unknown step kind")],
            ),
        }
    }
}

impl ParseNode for CompileStep {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut flags: Vec<String> = vec![];
        let mut includes: Vec<String> = vec![];
        let mut sources: Vec<String> = vec![];
        let mut found_flags = false;

        for node in input.nodes() {
            match node.name().value() {
                "flags" => {
                    found_flags = true;
                    parse_string_list_into!(node, flags, errors, "compiler flags");
                }

                "include" => {
                    parse_string_list_into!(node, includes, errors, "include directories");
                }

                "sources" => {
                    parse_string_list_into!(node, sources, errors, "source files");
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown compile entry")),
            }
        }

        if !found_flags {
            flags = DEFAULT_COMPILE_FLAGS.iter().map(ToString::to_string).collect();
        }

        if sources.is_empty() {
            errors.push(KilnParseError {
                span: *input.span(),
                label: None,
                help: Some("add `sources \"path/to/file.c\"`".into()),
                kind: "compile step needs at least one source file",
            });
            return (None, errors);
        }

        (
            Some(CompileStep {
                flags,
                includes,
                sources,
            }),
            errors,
        )
    }
}

impl ParseNode for MakeStep {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut project: Option<String> = None;
        let mut args: Vec<String> = vec![];
        let mut artifact: Vec<String> = vec![];

        for node in input.nodes() {
            match node.name().value() {
                "project" => {
                    parse_string_into!(node, project, errors, "make project");
                }

                "args" => {
                    parse_string_list_into!(node, args, errors, "make arguments");
                }

                "artifact" => {
                    parse_string_list_into!(node, artifact, errors, "make artifact");
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown make entry")),
            }
        }

        match (project, artifact.is_empty()) {
            (Some(project), false) => (
                Some(MakeStep {
                    project,
                    args,
                    artifact,
                }),
                errors,
            ),

            (project, no_artifact) => {
                if project.is_none() {
                    errors.push(KilnParseError::at(
                        input.span(),
                        "make step requires the dependency it builds as `project`",
                    ));
                }

                if no_artifact {
                    errors.push(KilnParseError::at(
                        input.span(),
                        "make step requires the `artifact` it produces",
                    ));
                }

                (None, errors)
            }
        }
    }
}

impl ParseNode for CMakeStep {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut source: Option<String> = None;
        let mut scope = "cxx".to_string();
        let mut generator = CMakeStep::NINJA.to_string();
        let mut defines = BTreeMap::new();
        let mut artifact: Vec<String> = vec![];

        for node in input.nodes() {
            match node.name().value() {
                "source" => {
                    parse_string_into!(node, source, errors, "cmake source directory");
                }

                "scope" => {
                    parse_string_into!(node, scope, errors, "cmake scope");
                }

                "generator" => {
                    parse_string_into!(node, generator, errors, "cmake generator");
                }

                "define" => {
                    for entry in node.entries() {
                        match (entry.name(), entry.value().as_string()) {
                            (Some(key), Some(value)) => {
                                defines.insert(key.value().to_string(), value.to_string());
                            }

                            _ => errors.push(KilnParseError {
                                span: *entry.span(),
                                label: None,
                                help: Some("write defines as `define CMAKE_BUILD_TYPE=\"Release\"`".into()),
                                kind: "cmake define expects string properties",
                            }),
                        }
                    }
                }

                "artifact" => {
                    parse_string_list_into!(node, artifact, errors, "cmake artifact");
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown cmake entry")),
            }
        }

        if !is_single_component(&scope) {
            errors.push(KilnParseError::at(
                input.span(),
                "cmake scope must be a single path component",
            ));
            return (None, errors);
        }

        match (source, artifact.is_empty()) {
            (Some(source), false) => (
                Some(CMakeStep {
                    source,
                    scope,
                    generator,
                    defines,
                    artifact,
                }),
                errors,
            ),

            (source, no_artifact) => {
                if source.is_none() {
                    errors.push(KilnParseError::at(
                        input.span(),
                        "cmake step requires a `source` directory",
                    ));
                }

                if no_artifact {
                    errors.push(KilnParseError::at(
                        input.span(),
                        "cmake step requires the `artifact` it produces",
                    ));
                }

                (None, errors)
            }
        }
    }
}

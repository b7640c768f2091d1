use crate::definition::steps::Step;
use crate::definition::{Dependency, Document, Layout, Pipeline, PipelineOptions, Toolchain};
use kdl::{KdlDocument, KdlNode};
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[error("Failed parsing kiln manifest")]
pub struct KilnParserCompoundError {
    #[source_code]
    pub source_code: NamedSource,
    #[related]
    pub errors: Vec<KilnParseError>,
}

#[derive(Debug, Diagnostic, Eq, PartialEq, Error)]
#[error("{kind}")]
pub struct KilnParseError {
    /// Offset in chars of the error.
    #[label("{}", label.unwrap_or("here"))]
    pub span: SourceSpan,

    /// Label text for this span. Defaults to `"here"`.
    pub label: Option<&'static str>,

    /// Suggestion for fixing the parser error.
    #[help]
    pub help: Option<String>,

    /// Specific error kind for this parser error.
    pub kind: &'static str,
}

impl KilnParseError {
    pub(crate) fn at(span: &SourceSpan, kind: &'static str) -> Self {
        KilnParseError {
            span: *span,
            label: None,
            help: None,
            kind,
        }
    }
}

const EMPTY_NODES: &[KdlNode] = &[];

pub(crate) trait GetNodes {
    fn nodes(&self) -> &[KdlNode];
}

pub(crate) trait ProxyMap<T, R> {
    type Output;

    fn map<F: FnOnce(T) -> R>(self, data: F) -> Self::Output;
}

impl<T, R, T2> ProxyMap<T, R> for (Option<T>, T2) {
    type Output = (Option<R>, T2);

    fn map<F: FnOnce(T) -> R>(self, data: F) -> Self::Output {
        (self.0.map(data), self.1)
    }
}

impl GetNodes for KdlNode {
    fn nodes(&self) -> &[KdlNode] {
        self.children().map_or(EMPTY_NODES, |x| x.nodes())
    }
}

fn named_source(source: &str, filename: Option<&str>) -> NamedSource {
    NamedSource::new(
        filename
            .map(ToString::to_string)
            .unwrap_or_else(|| "[memory.kdl]".to_string()),
        source.to_string(),
    )
}

pub trait ParseDocument {
    /// Parses the document, failing on any collected error.
    fn parse_document_strict(
        input: &KdlDocument,
        source: &str,
        filename: Option<&str>,
    ) -> miette::Result<Self>
    where
        Self: Sized,
    {
        let (data, errors) = Self::parse_document_with_errors(input);

        match data {
            Some(obj) if errors.is_empty() => Ok(obj),

            _ => Err(KilnParserCompoundError {
                source_code: named_source(source, filename),
                errors,
            }
            .into()),
        }
    }

    fn parse_document_with_errors(input: &KdlDocument) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized;
}

pub trait ParseNode {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized;
}

#[macro_export]
macro_rules! parse_string_into {
    ($input:ident, $into:expr, $errors:expr, $name:literal) => {
        match $crate::definition::parsing::extract_single_string_value(
            $input,
            concat!($name, " missing"),
            concat!($name, " should be a string"),
            concat!("only 1 string expected for ", $name),
            concat!($name, " expected a value, property found instead"),
        ) {
            Ok(n) => $into = n.into(),
            Err(e) => $errors.push(e),
        };
    };
}

#[macro_export]
macro_rules! parse_bool_into {
    ($input:ident, $into:expr, $errors:expr, $name:literal) => {
        match $crate::definition::parsing::extract_single_bool_value(
            $input,
            concat!($name, " missing"),
            concat!($name, " should be a bool"),
            concat!("only 1 bool expected for ", $name),
            concat!($name, " expected a value, property found instead"),
        ) {
            Ok(n) => $into = n.into(),
            Err(e) => $errors.push(e),
        };
    };
}

#[macro_export]
macro_rules! parse_count_into {
    ($input:ident, $into:expr, $errors:expr, $name:literal) => {
        match $crate::definition::parsing::extract_single_count_value(
            $input,
            concat!($name, " missing"),
            concat!($name, " should be a non-negative integer"),
            concat!("only 1 integer expected for ", $name),
            concat!($name, " expected a value, property found instead"),
        ) {
            Ok(n) => $into = n.into(),
            Err(e) => $errors.push(e),
        };
    };
}

#[macro_export]
macro_rules! parse_string_list_into {
    ($input:ident, $into:expr, $errors:expr, $name:literal) => {
        match $crate::definition::parsing::extract_string_values(
            $input,
            concat!($name, " expects only string values"),
            concat!($name, " expected values, property found instead"),
        ) {
            Ok(n) => $crate::definition::parsing::ListExtHelper::add(&mut $into, n),
            Err(e) => $errors.push(e),
        };
    };
}

pub trait ListExtHelper<T> {
    fn add(&mut self, value: Vec<T>);
}

impl<T> ListExtHelper<T> for Vec<T> {
    fn add(&mut self, value: Vec<T>) {
        self.extend(value);
    }
}

impl ParseDocument for Document {
    fn parse_document_with_errors(input: &KdlDocument) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut pipelines = vec![];
        let mut errors = vec![];

        for node in input.nodes() {
            match node.name().value() {
                "pipeline" => {
                    let (pipeline, err) = Pipeline::parse_node_with_errors(node);
                    if let Some(pipeline) = pipeline {
                        pipelines.push(pipeline);
                    }
                    errors.extend(err);
                }

                _ => errors.push(KilnParseError {
                    span: *node.name().span(),
                    label: None,
                    help: Some("declare dependencies and steps inside a `pipeline` node".into()),
                    kind: "unexpected top-level node",
                }),
            }
        }

        if pipelines.is_empty() && errors.is_empty() {
            errors.push(KilnParseError::at(input.span(), "manifest declares no pipeline"));
        }

        (Some(Document { pipelines }), errors)
    }
}

impl ParseNode for Pipeline {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors: Vec<KilnParseError> = vec![];

        let mut name: String = "<unnamed>".to_string();
        let mut layout: Option<Layout> = None;
        let mut toolchain: Option<Toolchain> = None;
        let mut options: Option<PipelineOptions> = None;
        let mut dependencies: Vec<Dependency> = vec![];
        let mut steps: Vec<Step> = vec![];

        let mut seen_dependencies = HashSet::new();
        let mut seen_steps = HashSet::new();
        let mut make_projects = vec![];

        parse_string_into!(input, name, errors, "name of pipeline");
        for node in input.nodes() {
            match node.name().value() {
                "layout" => {
                    if layout.is_some() {
                        errors.push(KilnParseError {
                            span: *node.span(),
                            label: Some("second definition of layout here"),
                            help: None,
                            kind: "redefinition of layout, a pipeline has one layout",
                        });
                        continue;
                    }

                    let (lay, err) = Layout::parse_node_with_errors(node);
                    errors.extend(err);
                    layout = lay;
                }

                "toolchain" => {
                    let (tc, err) = Toolchain::parse_node_with_errors(node);
                    errors.extend(err);
                    toolchain = tc;
                }

                "options" => {
                    let (opt, err) = PipelineOptions::parse_node_with_errors(node);
                    errors.extend(err);
                    options = opt;
                }

                "dependency" => {
                    let (dep, err) = Dependency::parse_node_with_errors(node);
                    errors.extend(err);

                    if let Some(dep) = dep {
                        if !seen_dependencies.insert(dep.name.clone()) {
                            errors.push(KilnParseError {
                                span: *node.span(),
                                label: Some("declared again here"),
                                help: None,
                                kind: "dependency is declared more than once",
                            });
                            continue;
                        }

                        dependencies.push(dep);
                    }
                }

                "compile" | "make" | "cmake" => {
                    let (step, err) = Step::parse_node_with_errors(node);
                    errors.extend(err);

                    if let Some(step) = step {
                        if !seen_steps.insert(step.name.clone()) {
                            errors.push(KilnParseError {
                                span: *node.span(),
                                label: Some("declared again here"),
                                help: Some(
                                    "each step owns the artifact lib<name>.so, names must be unique"
                                        .into(),
                                ),
                                kind: "step name is used more than once",
                            });
                            continue;
                        }

                        if let Some(project) = step.consumed_dependency() {
                            make_projects.push((project.to_string(), *node.span()));
                        }

                        steps.push(step);
                    }
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown pipeline entry")),
            }
        }

        for (project, span) in make_projects {
            if !seen_dependencies.contains(&project) {
                errors.push(KilnParseError {
                    span,
                    label: Some("consumed here"),
                    help: Some(format!("declare `dependency \"{}\"` in this pipeline", project)),
                    kind: "step builds a project that is not a declared dependency",
                });
            }
        }

        if steps.is_empty() {
            errors.push(KilnParseError::at(input.span(), "pipeline declares no build steps"));
        }

        (
            Some(Pipeline {
                name,
                layout: layout.unwrap_or_default(),
                toolchain: toolchain.unwrap_or_default(),
                options: options.unwrap_or_default(),
                dependencies,
                steps,
            }),
            errors,
        )
    }
}

impl ParseNode for Layout {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut layout = Layout::default();
        let mut errors = vec![];

        for node in input.nodes() {
            match node.name().value() {
                "source" => {
                    parse_string_into!(node, layout.source, errors, "source root");
                }

                "native" => {
                    parse_string_into!(node, layout.native, errors, "native output directory");
                }

                "generated" => {
                    parse_string_into!(node, layout.generated, errors, "generated build root");
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown layout entry")),
            }
        }

        (Some(layout), errors)
    }
}

impl ParseNode for Toolchain {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut toolchain = Toolchain::default();
        let mut errors = vec![];

        for node in input.nodes() {
            match node.name().value() {
                "git" => {
                    parse_string_into!(node, toolchain.git, errors, "git program");
                }

                "cc" => {
                    parse_string_into!(node, toolchain.cc, errors, "c compiler");
                }

                "make" => {
                    parse_string_into!(node, toolchain.make, errors, "make program");
                }

                "cmake" => {
                    parse_string_into!(node, toolchain.cmake, errors, "cmake program");
                }

                "ninja" => {
                    parse_string_into!(node, toolchain.ninja, errors, "ninja program");
                }

                "strip" => {
                    parse_string_into!(node, toolchain.strip, errors, "strip program");
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown tool")),
            }
        }

        (Some(toolchain), errors)
    }
}

impl ParseNode for PipelineOptions {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut strip = None;
        let mut jobs: Option<usize> = None;

        for node in input.nodes() {
            match node.name().value() {
                "strip" => {
                    parse_bool_into!(node, strip, errors, "strip");
                }

                "jobs" => {
                    parse_count_into!(node, jobs, errors, "jobs");

                    if jobs == Some(0) {
                        errors.push(KilnParseError::at(node.span(), "jobs must be at least 1"));
                        jobs = None;
                    }
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown option")),
            }
        }

        (Some(PipelineOptions { strip, jobs }), errors)
    }
}

impl ParseNode for Dependency {
    fn parse_node_with_errors(input: &KdlNode) -> (Option<Self>, Vec<KilnParseError>)
    where
        Self: Sized,
    {
        let mut errors = vec![];
        let mut name: Option<String> = None;
        let mut url: Option<String> = None;
        let mut depth: usize = 1;
        let mut recursive = true;
        let mut branch: Option<String> = None;

        parse_string_into!(input, name, errors, "name of dependency");
        for node in input.nodes() {
            match node.name().value() {
                "url" => {
                    parse_string_into!(node, url, errors, "url of dependency");
                }

                "depth" => {
                    parse_count_into!(node, depth, errors, "clone depth");
                }

                "recursive" => {
                    parse_bool_into!(node, recursive, errors, "recursive");
                }

                "branch" => {
                    parse_string_into!(node, branch, errors, "branch");
                }

                _ => errors.push(KilnParseError::at(node.name().span(), "unknown dependency entry")),
            }
        }

        if let Some(name) = &name {
            if !is_single_component(name) {
                errors.push(KilnParseError {
                    span: *input.span(),
                    label: None,
                    help: Some("the name becomes a directory under the source root".into()),
                    kind: "dependency name must be a single path component",
                });
                return (None, errors);
            }
        }

        let res = match (name, url) {
            (Some(name), Some(url)) => Some(Dependency {
                name,
                url,
                depth,
                recursive,
                branch,
            }),

            (_, None) => {
                errors.push(KilnParseError::at(
                    input.span(),
                    "dependency requires an url to be given",
                ));
                None
            }

            _ => None,
        };

        (res, errors)
    }
}

fn span_of_entries(input: &KdlNode) -> SourceSpan {
    let entries = input.entries();
    match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => {
            let start = first.span().offset();
            let end = last.span().offset() + last.span().len();
            SourceSpan::new(start.into(), (end - start).into())
        }
        _ => *input.span(),
    }
}

fn extract_single_entry<'a>(
    input: &'a KdlNode,
    missing_error: &'static str,
    too_many_error: &'static str,
    property_found_error: &'static str,
) -> Result<&'a kdl::KdlEntry, KilnParseError> {
    match input.entries() {
        [] => Err(KilnParseError::at(input.name().span(), missing_error)),

        [entry] => {
            if entry.name().is_some() {
                return Err(KilnParseError::at(entry.span(), property_found_error));
            }

            Ok(entry)
        }

        _ => Err(KilnParseError {
            span: span_of_entries(input),
            label: None,
            help: None,
            kind: too_many_error,
        }),
    }
}

/// Names that become a directory or file name under one of the layout roots.
pub(crate) fn is_single_component(name: &str) -> bool {
    !(name.is_empty() || name.contains(['/', '\\']) || name == "." || name == "..")
}

pub(crate) fn extract_single_bool_value(
    input: &KdlNode,
    missing_error: &'static str,
    wrong_type_error: &'static str,
    too_many_error: &'static str,
    property_found_error: &'static str,
) -> Result<bool, KilnParseError> {
    let entry = extract_single_entry(input, missing_error, too_many_error, property_found_error)?;

    entry
        .value()
        .as_bool()
        .ok_or_else(|| KilnParseError::at(entry.span(), wrong_type_error))
}

pub(crate) fn extract_single_count_value(
    input: &KdlNode,
    missing_error: &'static str,
    wrong_type_error: &'static str,
    too_many_error: &'static str,
    property_found_error: &'static str,
) -> Result<usize, KilnParseError> {
    let entry = extract_single_entry(input, missing_error, too_many_error, property_found_error)?;

    entry
        .value()
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| KilnParseError::at(entry.span(), wrong_type_error))
}

pub(crate) fn extract_single_string_value(
    input: &KdlNode,
    missing_error: &'static str,
    wrong_type_error: &'static str,
    too_many_error: &'static str,
    property_found_error: &'static str,
) -> Result<String, KilnParseError> {
    let entry = extract_single_entry(input, missing_error, too_many_error, property_found_error)?;

    entry
        .value()
        .as_string()
        .map(ToString::to_string)
        .ok_or_else(|| KilnParseError::at(entry.span(), wrong_type_error))
}

pub(crate) fn extract_string_values(
    input: &KdlNode,
    wrong_type_error: &'static str,
    property_found_error: &'static str,
) -> Result<Vec<String>, KilnParseError> {
    let mut values = vec![];

    for entry in input.entries() {
        if entry.name().is_some() {
            return Err(KilnParseError::at(entry.span(), property_found_error));
        }

        if let Some(v) = entry.value().as_string() {
            values.push(v.to_string());
        } else {
            return Err(KilnParseError::at(entry.span(), wrong_type_error));
        }
    }

    Ok(values)
}

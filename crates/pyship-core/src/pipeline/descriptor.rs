use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use toml_edit::{Array, DocumentMut, InlineTable, Item, Table, Value as TomlValue};

use pyship_domain::PublishRequest;

use super::typing::TypingArtifactSet;
use super::workspace::BuildWorkspace;
use crate::error::PublishError;

const REQUIRES_PYTHON: &str = ">=3.8";
const README_NAMES: [&str; 3] = ["README.md", "README.rst", "README.txt"];

/// Creates an empty `__init__.py` when the staged package has none.
pub(crate) fn ensure_package_init(workspace: &BuildWorkspace) -> Result<bool, PublishError> {
    let init = workspace.package_dir().join("__init__.py");
    if init.exists() {
        return Ok(false);
    }
    fs::write(&init, b"")
        .with_context(|| format!("writing {}", init.display()))
        .map_err(PublishError::Workspace)?;
    Ok(true)
}

/// Writes `<root>/pyproject.toml` for the staged package.
pub(crate) fn write_project_descriptor(
    workspace: &BuildWorkspace,
    request: &PublishRequest,
    typing: &TypingArtifactSet,
) -> Result<PathBuf, PublishError> {
    let path = workspace.root().join("pyproject.toml");
    let contents = render_pyproject(workspace, request, typing).to_string();
    fs::write(&path, contents)
        .with_context(|| format!("writing {}", path.display()))
        .map_err(PublishError::Workspace)?;
    Ok(path)
}

fn render_pyproject(
    workspace: &BuildWorkspace,
    request: &PublishRequest,
    typing: &TypingArtifactSet,
) -> DocumentMut {
    let import_name = workspace.import_name();
    let mut doc = DocumentMut::new();

    let mut requires = Array::new();
    requires.push("setuptools>=70");
    requires.push("wheel");
    let mut build_system = Table::new();
    build_system.insert("requires", Item::Value(TomlValue::Array(requires)));
    build_system.insert(
        "build-backend",
        Item::Value(TomlValue::from("setuptools.build_meta")),
    );
    doc.insert("build-system", Item::Table(build_system));

    let mut project = Table::new();
    project.insert("name", Item::Value(TomlValue::from(request.name.trim())));
    project.insert("version", Item::Value(TomlValue::from(request.version.trim())));
    if let Some(description) = non_blank(request.description.as_deref()) {
        project.insert("description", Item::Value(TomlValue::from(description)));
    }
    if let Some(readme) = workspace
        .staged_files()
        .iter()
        .find(|rel| README_NAMES.contains(&rel.as_str()))
    {
        project.insert(
            "readme",
            Item::Value(TomlValue::from(format!("{import_name}/{readme}"))),
        );
    }
    project.insert("requires-python", Item::Value(TomlValue::from(REQUIRES_PYTHON)));
    if let Some(license) = non_blank(request.license_text.as_deref()) {
        let mut table = InlineTable::new();
        table.insert("text", TomlValue::from(license));
        project.insert("license", Item::Value(TomlValue::InlineTable(table)));
    }
    let author_name = non_blank(request.author.as_deref());
    let author_email = non_blank(request.email.as_deref());
    if author_name.is_some() || author_email.is_some() {
        let mut author = InlineTable::new();
        if let Some(name) = author_name {
            author.insert("name", TomlValue::from(name));
        }
        if let Some(email) = author_email {
            author.insert("email", TomlValue::from(email));
        }
        let mut authors = Array::new();
        authors.push(TomlValue::InlineTable(author));
        project.insert("authors", Item::Value(TomlValue::Array(authors)));
    }
    let mut dependencies = Array::new();
    for spec in &request.dependencies {
        dependencies.push(spec.trim());
    }
    project.insert("dependencies", Item::Value(TomlValue::Array(dependencies)));
    doc.insert("project", Item::Table(project));

    let mut packages = Array::new();
    for package in package_names(workspace) {
        packages.push(package);
    }
    let mut data = Array::new();
    for rel in &typing.package_data {
        data.push(rel.as_str());
    }
    let mut package_data = Table::new();
    package_data.insert(import_name, Item::Value(TomlValue::Array(data)));
    let mut setuptools = Table::new();
    setuptools.insert("packages", Item::Value(TomlValue::Array(packages)));
    setuptools.insert("include-package-data", Item::Value(TomlValue::from(true)));
    setuptools.insert("package-data", Item::Table(package_data));
    let mut tool = Table::new();
    tool.set_implicit(true);
    tool.insert("setuptools", Item::Table(setuptools));
    doc.insert("tool", Item::Table(tool));

    doc
}

/// The import package plus every staged subdirectory holding Python code.
fn package_names(workspace: &BuildWorkspace) -> BTreeSet<String> {
    let import_name = workspace.import_name();
    let mut names = BTreeSet::from([import_name.to_string()]);
    for rel in workspace.staged_files() {
        if !rel.ends_with(".py") {
            continue;
        }
        let parts: Vec<&str> = rel.split('/').collect();
        for depth in 1..parts.len() {
            names.insert(format!("{import_name}.{}", parts[..depth].join(".")));
        }
    }
    names
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

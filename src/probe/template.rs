//! Parser for the probe template form.

use crate::{
    probe::{FragmentTemplate, ProbeDescriptor, ProbeVariable},
    Result,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Section {
    Before,
    After,
    Incremental,
}

struct OpenSection {
    section: Section,
    requires: Vec<String>,
    line: usize,
    code: Vec<String>,
}

/// Parses a probe template into a [`ProbeDescriptor`].
pub(crate) fn parse(text: &str) -> Result<ProbeDescriptor> {
    let mut probe: Option<ProbeDescriptor> = None;
    let mut open: Option<OpenSection> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if let Some(section) = open.as_mut() {
            if line == "end" {
                if let (Some(section), Some(probe)) = (open.take(), probe.as_mut()) {
                    close_section(probe, section)?;
                }
            } else {
                section.code.push(raw.to_string());
            }
            continue;
        }

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };

        if keyword == "probe" {
            if probe.is_some() {
                return Err(configuration_error!(
                    "line {}: template declares more than one probe",
                    line_no
                ));
            }
            if !is_identifier(rest) {
                return Err(configuration_error!(
                    "line {}: invalid probe name '{}'",
                    line_no,
                    rest
                ));
            }
            probe = Some(ProbeDescriptor::new(rest));
            continue;
        }

        let Some(current) = probe.as_mut() else {
            return Err(configuration_error!(
                "line {}: expected 'probe <Name>' header",
                line_no
            ));
        };

        match keyword {
            "var" => {
                let (name, type_name) = rest.split_once(':').ok_or_else(|| {
                    configuration_error!("line {}: expected 'var <name>: <type>'", line_no)
                })?;
                let (name, type_name) = (name.trim(), type_name.trim());
                if !is_identifier(name) || type_name.is_empty() {
                    return Err(configuration_error!(
                        "line {}: invalid variable declaration '{}'",
                        line_no,
                        rest
                    ));
                }
                current.variables.push(ProbeVariable {
                    name: name.to_string(),
                    type_name: type_name.to_string(),
                });
            }
            "before" | "after" | "incremental" => {
                let section = match keyword {
                    "before" => Section::Before,
                    "after" => Section::After,
                    _ => Section::Incremental,
                };
                let requires = if rest.is_empty() {
                    Vec::new()
                } else {
                    parse_requires(rest, line_no)?
                };
                if section == Section::Incremental && !requires.is_empty() {
                    return Err(configuration_error!(
                        "line {}: incremental fragments cannot be conditional",
                        line_no
                    ));
                }
                open = Some(OpenSection {
                    section,
                    requires,
                    line: line_no,
                    code: Vec::new(),
                });
            }
            other => {
                return Err(configuration_error!(
                    "line {}: unknown keyword '{}'",
                    line_no,
                    other
                ));
            }
        }
    }

    if let Some(section) = open {
        return Err(configuration_error!(
            "line {}: {:?} section is not closed with 'end'",
            section.line,
            section.section
        ));
    }
    probe.ok_or_else(|| configuration_error!("template declares no probe"))
}

fn close_section(probe: &mut ProbeDescriptor, section: OpenSection) -> Result<()> {
    let code = dedent(&section.code);
    match section.section {
        Section::Before => probe.before.push(FragmentTemplate {
            requires: section.requires,
            code,
        }),
        Section::After => probe.after.push(FragmentTemplate {
            requires: section.requires,
            code,
        }),
        Section::Incremental => {
            if probe.incremental.is_some() {
                return Err(configuration_error!(
                    "line {}: probe {} declares more than one incremental section",
                    section.line,
                    probe.name
                ));
            }
            probe.incremental = Some(code);
        }
    }
    Ok(())
}

/// Parses `requires "a", "b"`.
fn parse_requires(text: &str, line_no: usize) -> Result<Vec<String>> {
    let list = text
        .strip_prefix("requires")
        .ok_or_else(|| configuration_error!("line {}: unexpected '{}'", line_no, text))?
        .trim();

    let mut requires = Vec::new();
    for item in list.split(',') {
        let item = item.trim();
        let value = item
            .strip_prefix('"')
            .and_then(|i| i.strip_suffix('"'))
            .ok_or_else(|| {
                configuration_error!("line {}: expected a quoted string, got '{}'", line_no, item)
            })?;
        if value.is_empty() {
            return Err(configuration_error!(
                "line {}: empty requirement",
                line_no
            ));
        }
        requires.push(value.to_string());
    }
    Ok(requires)
}

fn dedent(lines: &[String]) -> String {
    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! Compilation of probe definitions into reusable fragments.
//!
//! Compilation turns template text into statement lists ready for injection:
//!
//! 1. every fragment is checked for balanced brackets and terminated string literals
//! 2. parameter and return placeholders become injection-time expressions
//! 3. implicit self-references are qualified with the probe name, except references to the
//!    probe's own variables and to shared context variables, which become plain locals
//! 4. the text is split into one statement per line
//!
//! Failures are configuration errors: a probe that cannot be compiled can never be injected.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;

use crate::{
    probe::{
        template::is_identifier, ConditionalFragment, FragmentTemplate, MultiFragment,
        ProbeDescriptor, ProbeVariable, PARAMETER, RETURN_OBJECT, SHARED_CONTEXT_PREFIX,
    },
    registry::ExtensionRegistry,
    Result,
};

/// Expression the host substitutes with the parameter array.
const PARAMETER_EXPR: &str = "$args";
/// Expression the host substitutes with the return value.
const RETURN_EXPR: &str = "$_";

/// Compiles probe definitions and caches the result per probe type.
///
/// The cache lives as long as the engine that owns the compiler. Probe definitions are
/// immutable once registered, so a cached entry never goes stale.
///
/// # Thread Safety
///
/// The cache is a `DashMap`; concurrent lookups are safe. Mutation happens while the engine
/// holds its request lock.
#[derive(Debug, Default)]
pub struct ProbeFragmentCompiler {
    cache: DashMap<String, Arc<MultiFragment>>,
}

impl ProbeFragmentCompiler {
    /// Creates a compiler with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the compiled fragments of a registered probe type, compiling on first use.
    ///
    /// # Arguments
    ///
    /// * `registry` - Registry holding the probe definitions
    /// * `probe_type` - Name of the probe type
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownProbe`] if the probe is not registered and
    /// [`crate::Error::Configuration`] if its definition does not compile.
    pub fn get_fragments(
        &self,
        registry: &ExtensionRegistry,
        probe_type: &str,
    ) -> Result<Arc<MultiFragment>> {
        if let Some(cached) = self.cache.get(probe_type) {
            return Ok(cached.clone());
        }

        let descriptor = registry.probe(probe_type)?;
        let compiled = Arc::new(Self::compile(&descriptor)?);
        log::debug!("Compiled fragments of probe {}", probe_type);

        Ok(self
            .cache
            .entry(probe_type.to_string())
            .or_insert(compiled)
            .clone())
    }

    /// Number of compiled probe types held in the cache.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Compiles a probe definition without caching it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] describing the first problem found.
    pub fn compile(descriptor: &ProbeDescriptor) -> Result<MultiFragment> {
        if !is_identifier(&descriptor.name) {
            return Err(configuration_error!(
                "Invalid probe name '{}'",
                descriptor.name
            ));
        }

        let variables = collect_variables(descriptor)?;
        let context = RewriteContext {
            probe: &descriptor.name,
            variables: &variables,
        };

        let before = compile_section(&context, "before", &descriptor.before)?;
        let after = compile_section(&context, "after", &descriptor.after)?;
        let incremental = match &descriptor.incremental {
            Some(code) => context.compile_code("incremental", code)?,
            None => Vec::new(),
        };

        Ok(MultiFragment {
            probe: descriptor.name.clone(),
            variables,
            before,
            after,
            incremental,
        })
    }
}

fn collect_variables(descriptor: &ProbeDescriptor) -> Result<Vec<ProbeVariable>> {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    let mut variables = Vec::with_capacity(descriptor.variables.len());

    for variable in &descriptor.variables {
        if !is_identifier(&variable.name) || variable.type_name.trim().is_empty() {
            return Err(configuration_error!(
                "Probe {} declares invalid variable '{}: {}'",
                descriptor.name,
                variable.name,
                variable.type_name
            ));
        }
        match seen.get(variable.name.as_str()) {
            Some(existing) if *existing != variable.type_name => {
                return Err(configuration_error!(
                    "Probe {} declares variable {} as both {} and {}",
                    descriptor.name,
                    variable.name,
                    existing,
                    variable.type_name
                ));
            }
            Some(_) => {}
            None => {
                seen.insert(&variable.name, &variable.type_name);
                variables.push(variable.clone());
            }
        }
    }
    Ok(variables)
}

fn compile_section(
    context: &RewriteContext<'_>,
    section: &str,
    templates: &[FragmentTemplate],
) -> Result<Vec<ConditionalFragment>> {
    let mut fragments = Vec::with_capacity(templates.len());
    let mut has_default = false;

    for template in templates {
        if template.requires.iter().any(|r| r.trim().is_empty()) {
            return Err(configuration_error!(
                "Probe {} has an empty requirement in a {} fragment",
                context.probe,
                section
            ));
        }
        if template.requires.is_empty() {
            if has_default {
                return Err(configuration_error!(
                    "Probe {} declares more than one unconditional {} fragment",
                    context.probe,
                    section
                ));
            }
            has_default = true;
        }
        fragments.push(ConditionalFragment {
            requires: template.requires.clone(),
            statements: context.compile_code(section, &template.code)?,
        });
    }
    Ok(fragments)
}

struct RewriteContext<'a> {
    probe: &'a str,
    variables: &'a [ProbeVariable],
}

impl RewriteContext<'_> {
    fn compile_code(&self, section: &str, code: &str) -> Result<Vec<String>> {
        check_balanced(code).map_err(|reason| {
            configuration_error!(
                "Invalid instrumentation probe {} ({} fragment): {}",
                self.probe,
                section,
                reason
            )
        })?;

        code.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("//"))
            .map(|line| {
                self.rewrite(line).map_err(|reason| {
                    configuration_error!(
                        "Invalid instrumentation probe {} ({} fragment): {}",
                        self.probe,
                        section,
                        reason
                    )
                })
            })
            .collect()
    }

    fn is_local(&self, name: &str) -> bool {
        name.starts_with(SHARED_CONTEXT_PREFIX) || self.variables.iter().any(|v| v.name == name)
    }

    /// Rewrites placeholders and self-references outside string literals.
    fn rewrite(&self, line: &str) -> std::result::Result<String, String> {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if c == '"' || c == '\'' {
                let end = string_end(&chars, i)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                out.extend(&chars[i..=end]);
                i = end + 1;
                continue;
            }

            let at_boundary = i == 0 || (!is_ident_char(chars[i - 1]) && chars[i - 1] != '.');
            if !(at_boundary && (c.is_ascii_alphabetic() || c == '_')) {
                out.push(c);
                i += 1;
                continue;
            }

            let (ident, next) = read_identifier(&chars, i);
            match ident.as_str() {
                "self" if chars.get(next) == Some(&'.') => {
                    let (member, after) = read_identifier(&chars, next + 1);
                    if member.is_empty() {
                        return Err("dangling self reference".to_string());
                    }
                    if self.is_local(&member) {
                        out.push_str(&member);
                    } else {
                        out.push_str(self.probe);
                        out.push_str("::");
                        out.push_str(&member);
                    }
                    i = after;
                }
                PARAMETER if chars.get(next) == Some(&'[') => {
                    let close = chars[next..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| next + p)
                        .ok_or_else(|| "unclosed parameter index".to_string())?;
                    let index: String = chars[next + 1..close].iter().collect();
                    let index = index
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| format!("invalid parameter index '{}'", index))?;
                    out.push_str(&format!("{}[{}]", PARAMETER_EXPR, index));
                    i = close + 1;
                }
                PARAMETER => {
                    out.push_str(PARAMETER_EXPR);
                    i = next;
                }
                RETURN_OBJECT => {
                    out.push_str(RETURN_EXPR);
                    i = next;
                }
                _ => {
                    out.push_str(&ident);
                    i = next;
                }
            }
        }
        Ok(out)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn read_identifier(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && is_ident_char(chars[end]) {
        end += 1;
    }
    (chars[start..end].iter().collect(), end)
}

/// Index of the quote closing the literal that opens at `start`.
fn string_end(chars: &[char], start: usize) -> Option<usize> {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Checks bracket nesting and string termination over a whole fragment.
fn check_balanced(code: &str) -> std::result::Result<(), String> {
    let mut stack = Vec::new();

    for (line_no, line) in code.lines().enumerate() {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '"' | '\'' => {
                    i = string_end(&chars, i).ok_or_else(|| {
                        format!("unterminated string literal on line {}", line_no + 1)
                    })?;
                }
                '/' if chars.get(i + 1) == Some(&'/') => break,
                open @ ('(' | '[' | '{') => stack.push(open),
                close @ (')' | ']' | '}') => {
                    let expected = match close {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(expected) {
                        return Err(format!("unbalanced '{}' on line {}", close, line_no + 1));
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    match stack.last() {
        Some(open) => Err(format!("unclosed '{}'", open)),
        None => Ok(()),
    }
}

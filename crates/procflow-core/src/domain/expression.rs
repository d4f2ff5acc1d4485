//! Expression capability used by guards, validations and script handlers.
//!
//! An [`ExpressionEngine`] compiles source text into a [`CompiledExpression`]
//! once; executing it against an [`ExpressionScope`] yields an integer where
//! `1` means pass/true and anything else means fail/false. Evaluation errors
//! are returned as [`CoreError::ExpressionError`], never swallowed.

use crate::domain::property_set::PropertySet;
use crate::error::{CoreError, CoreResult};
use crate::types::ProcessInstanceId;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Return code meaning pass/true
pub const PASS: i32 = 1;

/// Whether a return code means pass/true
#[inline]
pub fn passes(code: i32) -> bool {
    code == PASS
}

/// What an expression can see and change while it runs
pub struct ExpressionScope<'a> {
    /// Variable store of the process
    pub properties: &'a mut PropertySet,

    /// Transition requested by the caller, if any
    pub transition: Option<&'a str>,

    /// Extra host parameters
    pub params: &'a HashMap<String, Value>,

    /// Running instance
    pub instance_id: ProcessInstanceId,

    /// Step the expression belongs to
    pub step_id: &'a str,
}

impl<'a> ExpressionScope<'a> {
    /// JSON document the expression is evaluated against
    pub fn document(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        json!({
            "vars": self.properties.to_json(),
            "transition": self.transition,
            "params": params,
            "instance": {
                "id": self.instance_id.to_string(),
                "step": self.step_id,
            },
        })
    }
}

/// An executable, already compiled expression
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Run against `scope` and return the integer result
    fn execute(&self, scope: &mut ExpressionScope<'_>) -> CoreResult<i32>;
}

/// Compiles expression source text
pub trait ExpressionEngine: Send + Sync {
    /// Name of the expression language
    fn language(&self) -> &str;

    /// Compile `source`, returning every problem found on failure
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, Vec<String>>;
}

enum Statement {
    Assign {
        name: String,
        expression: jmespath::Expression<'static>,
    },
    Evaluate(jmespath::Expression<'static>),
}

/// Script compiled by [`JmesPathEngine`]
pub struct JmesPathScript {
    source: String,
    statements: Vec<Statement>,
}

impl fmt::Debug for JmesPathScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JmesPathScript")
            .field("source", &self.source)
            .field("statements", &self.statements.len())
            .finish()
    }
}

/// Default engine: one statement per line, JMESPath expressions.
///
/// * blank lines and lines starting with `#` are ignored
/// * `set <name> = <expression>` stores the result into variable `<name>`
/// * any other line is an expression; the last one gives the return code
///
/// A script without a trailing expression returns [`PASS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JmesPathEngine;

impl JmesPathEngine {
    /// Create the engine
    pub fn new() -> Self {
        Self
    }
}

fn compile_expression(
    line_no: usize,
    source: &str,
    errors: &mut Vec<String>,
) -> Option<jmespath::Expression<'static>> {
    match jmespath::compile(source) {
        Ok(expression) => Some(expression),
        Err(e) => {
            errors.push(format!("line {}: {}", line_no, e));
            None
        }
    }
}

/// Assignment targets are top-level variable names; nested paths are not supported
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ExpressionEngine for JmesPathEngine {
    fn language(&self) -> &str {
        "jmespath"
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, Vec<String>> {
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(assignment) = line.strip_prefix("set ") {
                let Some((name, expression)) = assignment.split_once('=') else {
                    errors.push(format!("line {}: expected 'set <name> = <expression>'", line_no));
                    continue;
                };
                let name = name.trim();
                if !is_identifier(name) {
                    errors.push(format!("line {}: invalid variable name '{}'", line_no, name));
                    continue;
                }
                if let Some(expression) = compile_expression(line_no, expression.trim(), &mut errors) {
                    statements.push(Statement::Assign {
                        name: name.to_string(),
                        expression,
                    });
                }
            } else if let Some(expression) = compile_expression(line_no, line, &mut errors) {
                statements.push(Statement::Evaluate(expression));
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Arc::new(JmesPathScript {
            source: source.to_string(),
            statements,
        }))
    }
}

fn return_code(result: &jmespath::Variable) -> i32 {
    if let Some(flag) = result.as_boolean() {
        return i32::from(flag);
    }
    if let Some(number) = result.as_number() {
        return number as i32;
    }
    i32::from(!result.is_null() && result.is_truthy())
}

fn search(
    expression: &jmespath::Expression<'static>,
    document: &Value,
) -> CoreResult<jmespath::Rcvar> {
    expression
        .search(document)
        .map_err(|e| CoreError::ExpressionError(e.to_string()))
}

impl CompiledExpression for JmesPathScript {
    fn execute(&self, scope: &mut ExpressionScope<'_>) -> CoreResult<i32> {
        let mut code = PASS;

        for statement in &self.statements {
            let document = scope.document();
            match statement {
                Statement::Assign { name, expression } => {
                    let result = search(expression, &document)?;
                    let value = serde_json::to_value(&*result)?;
                    trace!(variable = %name, "script assignment");
                    scope.properties.set_json(name, value).map_err(|e| {
                        CoreError::ExpressionError(format!("cannot assign '{}': {}", name, e))
                    })?;
                }
                Statement::Evaluate(expression) => {
                    let result = search(expression, &document)?;
                    code = return_code(&result);
                }
            }
        }

        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::property_set::PropertySchema;

    fn properties() -> PropertySet {
        let mut properties = PropertySet::new();
        properties.add_with_value("amount", 250, PropertySchema::int()).unwrap();
        properties.add("approved", PropertySchema::boolean().nullable()).unwrap();
        properties.add("label", PropertySchema::string().nullable()).unwrap();
        properties
    }

    fn run(source: &str, properties: &mut PropertySet, transition: Option<&str>) -> CoreResult<i32> {
        let compiled = JmesPathEngine::new().compile(source).expect("compiles");
        let params = HashMap::from([("region".to_string(), json!("eu"))]);
        let mut scope = ExpressionScope {
            properties,
            transition,
            params: &params,
            instance_id: ProcessInstanceId::new(),
            step_id: "review",
        };
        compiled.execute(&mut scope)
    }

    #[test]
    fn test_boolean_results() {
        let mut properties = properties();
        assert_eq!(run("vars.amount > `100`", &mut properties, None).unwrap(), 1);
        assert_eq!(run("vars.amount > `1000`", &mut properties, None).unwrap(), 0);
    }

    #[test]
    fn test_numeric_and_null_results() {
        let mut properties = properties();
        assert_eq!(run("`1`", &mut properties, None).unwrap(), 1);
        assert_eq!(run("`2`", &mut properties, None).unwrap(), 2);
        assert_eq!(run("vars.approved", &mut properties, None).unwrap(), 0);
        assert_eq!(run("params.region", &mut properties, None).unwrap(), 1);
    }

    #[test]
    fn test_assignments_update_properties() {
        let mut properties = properties();
        let script = "# decide\nset approved = vars.amount < `500`\nset label = instance.step\nvars.approved";
        assert_eq!(run(script, &mut properties, None).unwrap(), 1);
        assert!(properties.get::<bool>("approved").unwrap());
        assert_eq!(properties.get::<String>("label").unwrap(), "review");
    }

    #[test]
    fn test_script_without_expression_passes() {
        let mut properties = properties();
        assert_eq!(run("set label = 'x'", &mut properties, None).unwrap(), PASS);
        assert_eq!(run("# nothing", &mut properties, None).unwrap(), PASS);
    }

    #[test]
    fn test_transition_visible() {
        let mut properties = properties();
        assert_eq!(run("transition == 'approved'", &mut properties, Some("approved")).unwrap(), 1);
        assert_eq!(run("transition == 'approved'", &mut properties, None).unwrap(), 0);
    }

    #[test]
    fn test_compile_errors_collected() {
        let errors = JmesPathEngine::new()
            .compile("vars.[\nset = x\nset 9 bad = y")
            .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("line 1"));
    }

    #[test]
    fn test_assignment_targets_must_be_plain_names() {
        let engine = JmesPathEngine::new();
        for script in ["set a.b = `1`", "set a-b = `1`", "set 1a = `1`"] {
            let errors = engine.compile(script).unwrap_err();
            assert_eq!(errors.len(), 1, "{}", script);
            assert!(errors[0].contains("invalid variable name"));
        }
        assert!(engine.compile("set _total2 = `1`").is_ok());
    }

    #[test]
    fn test_runtime_error_surfaces() {
        let mut properties = properties();
        let result = run("set missing = `1`", &mut properties, None);
        assert!(matches!(result, Err(CoreError::ExpressionError(_))));

        let result = run("set amount = 'lots'", &mut properties, None);
        assert!(matches!(result, Err(CoreError::ExpressionError(_))));
    }
}

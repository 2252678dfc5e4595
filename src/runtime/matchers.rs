//! Assertion matchers
//!
//! Each matcher evaluates synchronously against the captured "actual" value
//! and either returns `Ok(true)` or fails with an [`AssertionError`]
//! describing the mismatch. Negation flips the pass condition and the
//! wording, except where a comparison is impossible: those fail either way.

use regex::Regex;
use thiserror::Error;

use crate::script::value::{ObjectClass, Value};

/// Name given to assertion failures inside scripts
pub const ASSERTION_ERROR: &str = "AssertionError";

/// Uniform failure raised by every matcher
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct AssertionError {
    pub message: String,
}

impl AssertionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of evaluating one matcher
#[derive(Debug, Clone, PartialEq)]
pub struct MatcherOutcome {
    pub pass: bool,
    pub message: String,
}

impl MatcherOutcome {
    pub fn into_result(self) -> Result<bool, AssertionError> {
        if self.pass {
            Ok(true)
        } else {
            Err(AssertionError::new(self.message))
        }
    }
}

type MatchResult = Result<bool, AssertionError>;

/// The value under test plus the `.not` flag
#[derive(Clone)]
pub struct Expectation {
    actual: Value,
    negated: bool,
}

impl Expectation {
    pub fn new(actual: Value) -> Self {
        Self {
            actual,
            negated: false,
        }
    }

    pub fn not(&self) -> Self {
        Self {
            actual: self.actual.clone(),
            negated: !self.negated,
        }
    }

    pub fn actual(&self) -> &Value {
        &self.actual
    }

    /// Apply negation; `describe` receives `""` or `"not "` for the message
    fn check(&self, pass: bool, describe: impl FnOnce(&str) -> String) -> MatchResult {
        let not = if self.negated { "not " } else { "" };
        MatcherOutcome {
            pass: pass != self.negated,
            message: describe(not),
        }
        .into_result()
    }

    fn shown(&self) -> String {
        self.actual.inspect()
    }

    pub fn to_be(&self, expected: &Value) -> MatchResult {
        let pass = self.actual.same_value(expected);
        self.check(pass, |not| {
            format!("expected {} {}to be {}", self.shown(), not, expected.inspect())
        })
    }

    pub fn to_equal(&self, expected: &Value) -> MatchResult {
        self.deep_equal(expected, false, "equal")
    }

    pub fn to_strict_equal(&self, expected: &Value) -> MatchResult {
        self.deep_equal(expected, true, "strictly equal")
    }

    fn deep_equal(&self, expected: &Value, strict: bool, verb: &str) -> MatchResult {
        let pass = structurally_equal(&self.actual, expected, strict)?;
        self.check(pass, |not| {
            format!("expected {} {}to {} {}", self.shown(), not, verb, expected.inspect())
        })
    }

    pub fn to_be_truthy(&self) -> MatchResult {
        let pass = self.actual.is_truthy();
        self.check(pass, |not| format!("expected {} {}to be truthy", self.shown(), not))
    }

    pub fn to_be_falsy(&self) -> MatchResult {
        let pass = !self.actual.is_truthy();
        self.check(pass, |not| format!("expected {} {}to be falsy", self.shown(), not))
    }

    pub fn to_be_null(&self) -> MatchResult {
        let pass = matches!(self.actual, Value::Null);
        self.check(pass, |not| format!("expected {} {}to be null", self.shown(), not))
    }

    pub fn to_be_undefined(&self) -> MatchResult {
        let pass = matches!(self.actual, Value::Undefined);
        self.check(pass, |not| format!("expected {} {}to be undefined", self.shown(), not))
    }

    pub fn to_be_defined(&self) -> MatchResult {
        let pass = !matches!(self.actual, Value::Undefined);
        self.check(pass, |not| format!("expected {} {}to be defined", self.shown(), not))
    }

    pub fn to_be_nan(&self) -> MatchResult {
        let pass = matches!(self.actual, Value::Number(n) if n.is_nan());
        self.check(pass, |not| format!("expected {} {}to be NaN", self.shown(), not))
    }

    pub fn to_contain(&self, item: &Value) -> MatchResult {
        let pass = match (&self.actual, item) {
            (Value::Array(items), _) => items.borrow().iter().any(|v| v.strict_equals(item)),
            (Value::Str(s), Value::Str(needle)) => s.contains(&**needle),
            (Value::Str(_), other) => {
                return Err(AssertionError::new(format!(
                    "expected a string to search for, received {}",
                    other.inspect()
                )))
            }
            (other, _) => {
                return Err(AssertionError::new(format!(
                    "expected an array or string, received {}",
                    other.inspect()
                )))
            }
        };
        self.check(pass, |not| {
            format!("expected {} {}to contain {}", self.shown(), not, item.inspect())
        })
    }

    pub fn to_have_length(&self, expected: &Value) -> MatchResult {
        let length = match &self.actual {
            Value::Array(items) => items.borrow().len(),
            Value::Str(s) => s.chars().count(),
            other => {
                return Err(AssertionError::new(format!(
                    "expected a value with a length, received {}",
                    other.inspect()
                )))
            }
        };
        let pass = expected.to_number() == length as f64;
        self.check(pass, |not| {
            format!(
                "expected {} {}to have length {}, got {}",
                self.shown(),
                not,
                expected.inspect(),
                length
            )
        })
    }

    /// `path` is a dotted property path
    pub fn to_have_property(&self, path: &str, expected: Option<&Value>) -> MatchResult {
        let found = lookup_path(&self.actual, path);
        let pass = match (&found, expected) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(value), Some(expected)) => structurally_equal(value, expected, false)?,
        };
        self.check(pass, |not| match expected {
            Some(expected) => format!(
                "expected {} {}to have property '{}' equal to {}",
                self.shown(),
                not,
                path,
                expected.inspect()
            ),
            None => format!("expected {} {}to have property '{}'", self.shown(), not, path),
        })
    }

    fn numbers(&self, expected: &Value, matcher: &str) -> Result<(f64, f64), AssertionError> {
        match (&self.actual, expected) {
            (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
            _ => Err(AssertionError::new(format!(
                "{} expects numbers, received {} and {}",
                matcher,
                self.shown(),
                expected.inspect()
            ))),
        }
    }

    pub fn to_be_greater_than(&self, expected: &Value) -> MatchResult {
        let (a, b) = self.numbers(expected, "toBeGreaterThan")?;
        self.check(a > b, |not| format!("expected {} {}to be greater than {}", self.shown(), not, expected.inspect()))
    }

    pub fn to_be_greater_than_or_equal(&self, expected: &Value) -> MatchResult {
        let (a, b) = self.numbers(expected, "toBeGreaterThanOrEqual")?;
        self.check(a >= b, |not| {
            format!("expected {} {}to be greater than or equal to {}", self.shown(), not, expected.inspect())
        })
    }

    pub fn to_be_less_than(&self, expected: &Value) -> MatchResult {
        let (a, b) = self.numbers(expected, "toBeLessThan")?;
        self.check(a < b, |not| format!("expected {} {}to be less than {}", self.shown(), not, expected.inspect()))
    }

    pub fn to_be_less_than_or_equal(&self, expected: &Value) -> MatchResult {
        let (a, b) = self.numbers(expected, "toBeLessThanOrEqual")?;
        self.check(a <= b, |not| {
            format!("expected {} {}to be less than or equal to {}", self.shown(), not, expected.inspect())
        })
    }

    /// Passes when `|actual - expected| < 10^-digits / 2`
    pub fn to_be_close_to(&self, expected: &Value, digits: Option<i32>) -> MatchResult {
        let (a, b) = self.numbers(expected, "toBeCloseTo")?;
        let digits = digits.unwrap_or(2);
        let pass = if a.is_infinite() && b.is_infinite() {
            a == b
        } else {
            (a - b).abs() < 10f64.powi(-digits) / 2.0
        };
        self.check(pass, |not| {
            format!(
                "expected {} {}to be close to {} ({} digits)",
                self.shown(),
                not,
                expected.inspect(),
                digits
            )
        })
    }

    pub fn to_be_type_of(&self, type_name: &str) -> MatchResult {
        let actual_type = self.actual.type_of();
        self.check(actual_type == type_name, |not| {
            format!(
                "expected {} {}to be of type '{}', got '{}'",
                self.shown(),
                not,
                type_name,
                actual_type
            )
        })
    }

    /// Instance check against a constructor. Error constructors match by
    /// name; `Error` matches every error object.
    pub fn to_be_instance_of(&self, constructor: &Value) -> MatchResult {
        let Value::Function(ctor) = constructor else {
            return Err(AssertionError::new(format!(
                "toBeInstanceOf expects a constructor, received {}",
                constructor.inspect()
            )));
        };
        let class = ctor.name.as_str();
        let pass = match &self.actual {
            Value::Promise(_) => class == "Promise",
            Value::Array(_) => class == "Array",
            Value::Object(obj) if obj.class == ObjectClass::Error => {
                let (name, _) = self.actual.error_parts().unwrap_or_default();
                class == "Error" || class == name
            }
            Value::Object(_) => class == "Object",
            _ => false,
        };
        self.check(pass, |not| {
            format!("expected {} {}to be an instance of {}", self.shown(), not, class)
        })
    }

    pub fn to_match(&self, pattern: &str) -> MatchResult {
        let Value::Str(text) = &self.actual else {
            return Err(AssertionError::new(format!(
                "toMatch expects a string, received {}",
                self.shown()
            )));
        };
        let regex = Regex::new(pattern)
            .map_err(|e| AssertionError::new(format!("invalid regular expression /{}/: {}", pattern, e)))?;
        let pass = regex.is_match(text);
        self.check(pass, |not| format!("expected {} {}to match /{}/", self.shown(), not, pattern))
    }

    /// `thrown` is what invoking the actual value threw, if anything.
    /// With `expected`, the thrown message must contain it.
    pub fn to_throw(&self, thrown: Option<&Value>, expected: Option<&str>) -> MatchResult {
        let message = thrown.map(thrown_message);
        let pass = match (&message, expected) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(message), Some(expected)) => message.contains(expected),
        };
        self.check(pass, |not| match (&message, expected) {
            (None, _) => format!("expected function {}to throw", not),
            (Some(message), Some(expected)) => format!(
                "expected function {}to throw an error containing '{}', but it threw '{}'",
                not, expected, message
            ),
            (Some(message), None) => format!("expected function {}to throw, but it threw '{}'", not, message),
        })
    }
}

/// Message of a thrown value: an error's `message`, otherwise its string form
pub fn thrown_message(thrown: &Value) -> String {
    match thrown.error_parts() {
        Some((_, message)) => message,
        None => thrown.to_js_string(),
    }
}

/// Primitives compare with `Object.is`, compound values by canonical form
fn structurally_equal(actual: &Value, expected: &Value, strict: bool) -> Result<bool, AssertionError> {
    if actual.is_primitive() || expected.is_primitive() {
        return Ok(actual.same_value(expected));
    }
    let left = actual
        .canonical(strict)
        .map_err(|e| AssertionError::new(format!("cannot compare values: {}", e)))?;
    let right = expected
        .canonical(strict)
        .map_err(|e| AssertionError::new(format!("cannot compare values: {}", e)))?;
    Ok(left == right)
}

fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value.clone();
    for key in path.split('.') {
        current = match &current {
            Value::Object(obj) => obj.props.borrow().get(key)?,
            Value::Function(f) => f.props.borrow().get(key)?,
            Value::Array(items) if key == "length" => Value::Number(items.borrow().len() as f64),
            Value::Array(items) => items.borrow().get(key.parse::<usize>().ok()?)?.clone(),
            Value::Str(s) if key == "length" => Value::Number(s.chars().count() as f64),
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::object(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
    }

    #[test]
    fn test_to_equal_ignores_key_order() {
        let actual = obj(&[("a", num(1.0)), ("b", num(2.0))]);
        let expected = obj(&[("b", num(2.0)), ("a", num(1.0))]);
        assert_eq!(Expectation::new(actual).to_equal(&expected), Ok(true));
    }

    #[test]
    fn test_to_equal_array_order_matters() {
        let actual = Value::array(vec![num(1.0), num(2.0)]);
        let expected = Value::array(vec![num(2.0), num(1.0)]);
        let err = Expectation::new(actual).to_equal(&expected).unwrap_err();
        assert_eq!(err.message, "expected [ 1, 2 ] to equal [ 2, 1 ]");
    }

    #[test]
    fn test_non_serializable_fails_even_negated() {
        let f = Value::native("f", |_, _, _| Box::pin(async { Ok(Value::Undefined) }));
        let actual = obj(&[("f", f)]);
        let expected = obj(&[("f", Value::Null)]);
        let expectation = Expectation::new(actual);
        assert!(expectation.to_equal(&expected).is_err());
        assert!(expectation.not().to_equal(&expected).is_err());
    }

    #[test]
    fn test_to_be_uses_object_is() {
        assert_eq!(Expectation::new(num(f64::NAN)).to_be(&num(f64::NAN)), Ok(true));
        assert!(Expectation::new(num(0.0)).to_be(&num(-0.0)).is_err());
        let a = Value::array(vec![]);
        let b = Value::array(vec![]);
        assert!(Expectation::new(a.clone()).to_be(&b).is_err());
        assert_eq!(Expectation::new(a.clone()).to_be(&a), Ok(true));
    }

    #[test]
    fn test_negation_message() {
        let err = Expectation::new(num(2.0)).not().to_be(&num(2.0)).unwrap_err();
        assert_eq!(err.message, "expected 2 not to be 2");
        assert_eq!(Expectation::new(num(2.0)).not().to_be(&num(3.0)), Ok(true));
    }

    #[test]
    fn test_to_throw() {
        let expectation = Expectation::new(Value::Undefined);
        let thrown = Value::error("Error", "bad input");
        assert_eq!(expectation.to_throw(Some(&thrown), Some("bad")), Ok(true));
        assert!(expectation.to_throw(Some(&thrown), Some("good")).is_err());
        let err = expectation.to_throw(None, None).unwrap_err();
        assert_eq!(err.message, "expected function to throw");
        assert_eq!(expectation.not().to_throw(None, None), Ok(true));
    }

    #[test]
    fn test_contain_and_length() {
        let list = Value::array(vec![num(1.0), Value::str("x")]);
        assert_eq!(Expectation::new(list.clone()).to_contain(&Value::str("x")), Ok(true));
        assert_eq!(Expectation::new(list).to_have_length(&num(2.0)), Ok(true));
        assert_eq!(
            Expectation::new(Value::str("hello")).to_contain(&Value::str("ell")),
            Ok(true)
        );
        assert!(Expectation::new(num(1.0)).to_have_length(&num(1.0)).is_err());
    }

    #[test]
    fn test_close_to_and_comparisons() {
        assert_eq!(Expectation::new(num(0.1 + 0.2)).to_be_close_to(&num(0.3), None), Ok(true));
        assert!(Expectation::new(num(0.31)).to_be_close_to(&num(0.3), Some(2)).is_err());
        assert_eq!(Expectation::new(num(3.0)).to_be_greater_than(&num(2.0)), Ok(true));
        assert!(Expectation::new(Value::str("3")).to_be_greater_than(&num(2.0)).is_err());
    }

    #[test]
    fn test_to_have_property_path() {
        let nested = obj(&[("a", obj(&[("b", Value::array(vec![num(7.0)]))]))]);
        let expectation = Expectation::new(nested);
        assert_eq!(expectation.to_have_property("a.b.0", Some(&num(7.0))), Ok(true));
        assert_eq!(expectation.to_have_property("a.b.length", None), Ok(true));
        assert!(expectation.to_have_property("a.c", None).is_err());
    }

    #[test]
    fn test_to_match_and_instance_of() {
        assert_eq!(Expectation::new(Value::str("v1.2.3")).to_match(r"^v\d+\.\d+"), Ok(true));
        assert!(Expectation::new(Value::str("x")).to_match("(").is_err());

        let type_error_ctor = Value::native_ctor("TypeError", |_, _, _| Box::pin(async { Ok(Value::Undefined) }));
        let error_ctor = Value::native_ctor("Error", |_, _, _| Box::pin(async { Ok(Value::Undefined) }));
        let thrown = Expectation::new(Value::error("TypeError", "x"));
        assert_eq!(thrown.to_be_instance_of(&type_error_ctor), Ok(true));
        assert_eq!(thrown.to_be_instance_of(&error_ctor), Ok(true));
        let plain = Expectation::new(Value::error("RangeError", "x"));
        assert!(plain.to_be_instance_of(&type_error_ctor).is_err());
    }
}

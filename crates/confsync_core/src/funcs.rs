//! Helper functions exposed to resource templates.
//!
//! A [`FunctionLibrary`] is bound to the mirror of one resource and installs
//! a fixed table of typed functions into a [`minijinja::Environment`]. The
//! pure helpers are public so they can be used and tested directly.

use minijinja::value::{Rest, Value, ValueKind};
use minijinja::{Environment, ErrorKind};
use tracing::warn;

use crate::error::{FuncError, FuncResult};
use crate::mirror::{clean, SharedMirror};

const GIB: u64 = 1024 * 1024 * 1024;

/// Names of all functions installed by [`FunctionLibrary::install`].
pub const FUNCTION_NAMES: &[&str] = &[
    "getv", "getvs", "get", "gets", "ls", "lsdir", "dir", "base", "split", "join", "json",
    "jsonArray", "getenv", "datetime", "concat", "byteToM", "strsub", "stradd", "strmul",
    "strdiv",
];

/// Function table bound to one resource's mirror.
#[derive(Clone)]
pub struct FunctionLibrary {
    mirror: SharedMirror,
}

impl FunctionLibrary {
    pub fn new(mirror: SharedMirror) -> Self {
        Self { mirror }
    }

    /// Register every helper on `env`.
    pub fn install(&self, env: &mut Environment<'_>) {
        let mirror = self.mirror.clone();
        env.add_function("getv", move |key: String, default: Option<String>| -> String {
            mirror
                .read()
                .get(&key)
                .map(str::to_string)
                .unwrap_or_else(|| default.unwrap_or_default())
        });

        let mirror = self.mirror.clone();
        env.add_function(
            "getvs",
            move |pattern: String| -> Result<Vec<String>, minijinja::Error> {
                let pairs = mirror.read().get_all(&pattern).map_err(into_template_error)?;
                Ok(pairs.into_iter().map(|p| p.value).collect())
            },
        );

        let mirror = self.mirror.clone();
        env.add_function("get", move |key: String| -> Result<Value, minijinja::Error> {
            mirror
                .read()
                .get_pair(&key)
                .map(|pair| Value::from_serialize(&pair))
                .ok_or_else(|| into_template_error(FuncError::KeyNotFound(key)))
        });

        let mirror = self.mirror.clone();
        env.add_function(
            "gets",
            move |pattern: String| -> Result<Vec<Value>, minijinja::Error> {
                let pairs = mirror.read().get_all(&pattern).map_err(into_template_error)?;
                Ok(pairs.iter().map(Value::from_serialize).collect())
            },
        );

        let mirror = self.mirror.clone();
        env.add_function("ls", move |dir: String| -> Vec<String> {
            mirror.read().list(&dir)
        });

        let mirror = self.mirror.clone();
        env.add_function("lsdir", move |dir: String| -> Vec<String> {
            mirror.read().list_dir(&dir)
        });

        env.add_function("dir", |path: String| -> String { dir(&path) });
        env.add_function("base", |path: String| -> String { base(&path) });
        env.add_function("split", |s: String, sep: String| -> Vec<String> {
            split(&s, &sep)
        });
        env.add_function(
            "join",
            |items: Value, sep: String| -> Result<String, minijinja::Error> {
                let parts: Vec<String> = items.try_iter()?.map(|v| v.to_string()).collect();
                Ok(parts.join(&sep))
            },
        );
        env.add_function("json", |data: String| -> Result<Value, minijinja::Error> {
            json_object(&data).map_err(into_template_error)
        });
        env.add_function("jsonArray", |data: String| -> Result<Value, minijinja::Error> {
            json_array(&data).map_err(into_template_error)
        });
        env.add_function("getenv", |name: String, default: Option<String>| -> String {
            getenv(&name, default.as_deref())
        });
        env.add_function("datetime", || -> String { chrono::Local::now().to_rfc3339() });
        env.add_function("concat", |values: Rest<Value>| -> String { concat(&values) });
        env.add_function("byteToM", |data: String| -> String {
            byte_to_m(&data).unwrap_or_else(|e| {
                warn!("byteToM: {}", e);
                BYTE_COUNT_FALLBACK.to_string()
            })
        });
        env.add_function("stradd", arithmetic(str_add));
        env.add_function("strsub", arithmetic(str_sub));
        env.add_function("strmul", arithmetic(str_mul));
        env.add_function("strdiv", arithmetic(str_div));
    }
}

fn arithmetic(
    op: fn(&Value, &Value) -> FuncResult<String>,
) -> impl Fn(Value, Value) -> Result<String, minijinja::Error> + Send + Sync + 'static {
    move |a: Value, b: Value| op(&a, &b).map_err(into_template_error)
}

fn into_template_error(err: impl Into<FuncError>) -> minijinja::Error {
    let err = err.into();
    minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()).with_source(err)
}

/// Parent directory of a slash-separated path.
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => clean(&path[..=idx]),
        None => ".".to_string(),
    }
}

/// Final element of a slash-separated path.
pub fn base(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Split on `sep`; an empty separator splits into characters.
pub fn split(s: &str, sep: &str) -> Vec<String> {
    if sep.is_empty() {
        return s.chars().map(String::from).collect();
    }
    s.split(sep).map(str::to_string).collect()
}

/// Parse a single JSON object.
pub fn json_object(data: &str) -> FuncResult<Value> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(data)?;
    Ok(Value::from_serialize(&object))
}

/// Parse a JSON array.
pub fn json_array(data: &str) -> FuncResult<Value> {
    let array: Vec<serde_json::Value> = serde_json::from_str(data)?;
    Ok(Value::from_serialize(&array))
}

/// Environment lookup; empty or unset variables yield `default`.
pub fn getenv(name: &str, default: Option<&str>) -> String {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.unwrap_or_default().to_string(),
    }
}

/// Concatenate values, spacing operands when neither neighbour is a string.
pub fn concat(values: &[Value]) -> String {
    let mut out = String::new();
    for (i, value) in values.iter().enumerate() {
        let is_string = value.kind() == ValueKind::String;
        if i > 0 && !is_string && values[i - 1].kind() != ValueKind::String {
            out.push(' ');
        }
        out.push_str(&value.to_string());
    }
    out
}

/// Label rendered by `byteToM` when its input is not a byte count.
pub const BYTE_COUNT_FALLBACK: &str = "0m";

/// Quantize a decimal byte count to whole binary gigabytes, labelled `m`.
///
/// Anything below one GiB becomes `"1m"`. Callers depend on the label as is.
pub fn byte_to_m(data: &str) -> FuncResult<String> {
    let bytes: u64 = data.parse().map_err(|source| FuncError::ByteCount {
        input: data.to_string(),
        source,
    })?;
    if bytes < GIB {
        Ok("1m".to_string())
    } else {
        Ok(format!("{}m", bytes / GIB))
    }
}

/// Coerce a template value to an integer.
///
/// Numbers are taken directly (floats truncate). Strings are tried as a
/// signed integer, then a float, then an unsigned integer.
pub fn to_int(value: &Value) -> FuncResult<i64> {
    match value.kind() {
        ValueKind::Number => {
            if let Ok(int) = i64::try_from(value.clone()) {
                Ok(int)
            } else if let Ok(float) = f64::try_from(value.clone()) {
                Ok(float as i64)
            } else {
                Err(FuncError::NotNumeric(value.to_string()))
            }
        }
        ValueKind::String => {
            let raw = value.as_str().unwrap_or_default().trim();
            parse_int(raw).ok_or_else(|| FuncError::NotNumeric(raw.to_string()))
        }
        _ => Err(FuncError::NotNumeric(value.to_string())),
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    if let Ok(int) = raw.parse::<i64>() {
        return Some(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if float.is_finite() {
            return Some(float as i64);
        }
    }
    raw.parse::<u64>().ok().map(|u| u as i64)
}

pub fn str_add(a: &Value, b: &Value) -> FuncResult<String> {
    let (a, b) = (to_int(a)?, to_int(b)?);
    a.checked_add(b)
        .map(|n| n.to_string())
        .ok_or_else(|| FuncError::Overflow(format!("{} + {}", a, b)))
}

/// Subtraction; results below zero clamp to `0`.
pub fn str_sub(a: &Value, b: &Value) -> FuncResult<String> {
    let (a, b) = (to_int(a)?, to_int(b)?);
    Ok(a.saturating_sub(b).max(0).to_string())
}

pub fn str_mul(a: &Value, b: &Value) -> FuncResult<String> {
    let (a, b) = (to_int(a)?, to_int(b)?);
    a.checked_mul(b)
        .map(|n| n.to_string())
        .ok_or_else(|| FuncError::Overflow(format!("{} * {}", a, b)))
}

/// Integer division; a zero divisor counts as `1` and negative results clamp to `0`.
pub fn str_div(a: &Value, b: &Value) -> FuncResult<String> {
    let (a, b) = (to_int(a)?, to_int(b)?);
    let divisor = if b == 0 { 1 } else { b };
    let quotient = a.checked_div(divisor).unwrap_or(i64::MAX);
    Ok(quotient.max(0).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::KvMirror;
    use minijinja::context;

    fn render(mirror: SharedMirror, source: &str) -> Result<String, minijinja::Error> {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);
        FunctionLibrary::new(mirror).install(&mut env);
        env.render_str(source, context! {})
    }

    fn mirror_with(pairs: &[(&str, &str)]) -> SharedMirror {
        let mirror = KvMirror::shared();
        for (k, v) in pairs {
            mirror.write().set(k, *v);
        }
        mirror
    }

    #[test]
    fn test_byte_to_m_boundaries() {
        assert_eq!(byte_to_m("0").unwrap(), "1m");
        assert_eq!(byte_to_m("1073741823").unwrap(), "1m");
        assert_eq!(byte_to_m("1073741824").unwrap(), "1m");
        assert_eq!(byte_to_m("2147483647").unwrap(), "1m");
        assert_eq!(byte_to_m("2147483648").unwrap(), "2m");
        assert!(matches!(
            byte_to_m("not-a-number"),
            Err(FuncError::ByteCount { .. })
        ));
        assert!(byte_to_m("-1").is_err());
    }

    #[test]
    fn test_byte_to_m_template_fallback() {
        let out = render(KvMirror::shared(), r#"{{ byteToM("not-a-number") }}"#).unwrap();
        assert_eq!(out, "0m");
    }

    #[test]
    fn test_to_int_coercion_order() {
        assert_eq!(to_int(&Value::from(7)).unwrap(), 7);
        assert_eq!(to_int(&Value::from(7.9)).unwrap(), 7);
        assert_eq!(to_int(&Value::from("-3")).unwrap(), -3);
        assert_eq!(to_int(&Value::from("2.75")).unwrap(), 2);
        assert!(to_int(&Value::from("abc")).is_err());
        assert!(to_int(&Value::from(true)).is_err());
    }

    #[test]
    fn test_arithmetic_clamps() {
        let v = Value::from;
        assert_eq!(str_add(&v(2), &Value::from("5")).unwrap(), "7");
        assert_eq!(str_mul(&Value::from("3"), &v(4)).unwrap(), "12");
        assert_eq!(str_sub(&v(2), &v(5)).unwrap(), "0");
        assert_eq!(str_sub(&v(5), &v(2)).unwrap(), "3");
        assert_eq!(str_div(&v(1), &v(0)).unwrap(), "1");
        assert_eq!(str_div(&v(9), &v(2)).unwrap(), "4");
        assert_eq!(str_div(&v(-9), &v(2)).unwrap(), "0");
        assert!(str_div(&Value::from("x"), &v(2)).is_err());
        assert!(str_mul(&v(i64::MAX), &v(2)).is_err());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(dir("/test/data/abc"), "/test/data");
        assert_eq!(dir("abc"), ".");
        assert_eq!(dir("/"), "/");
        assert_eq!(base("/test/key"), "key");
        assert_eq!(base("/test/key/"), "key");
        assert_eq!(base("///"), "/");
        assert_eq!(base(""), ".");
    }

    #[test]
    fn test_split_and_concat() {
        assert_eq!(split("foo:bar:baz", ":"), vec!["foo", "bar", "baz"]);
        assert_eq!(split("ab", ""), vec!["a", "b"]);
        let values = [Value::from("a"), Value::from(1), Value::from(2), Value::from("b")];
        assert_eq!(concat(&values), "a1 2b");
    }

    #[test]
    fn test_get_and_getv_templates() {
        let mirror = mirror_with(&[("/test/key", "abc"), ("/test/url", "http://www.abc.com")]);
        let out = render(
            mirror,
            "{% with kv = get(\"/test/key\") %}key: {{ base(kv.key) }} val: {{ kv.value }}{% endwith %}\nurl = {{ getv(\"/test/url\") }} missing = {{ getv(\"/nope\", \"dflt\") }}",
        )
        .unwrap();
        assert_eq!(
            out,
            "key: key val: abc\nurl = http://www.abc.com missing = dflt"
        );
    }

    #[test]
    fn test_get_missing_key_fails() {
        let err = render(KvMirror::shared(), r#"{{ get("/missing").value }}"#).unwrap_err();
        assert!(err.to_string().contains("/missing"));
    }

    #[test]
    fn test_gets_and_getvs_templates() {
        let mirror = mirror_with(&[
            ("/test/user", "mary"),
            ("/test/pass", "abc"),
            ("/nada/url", "url"),
        ]);
        let out = render(
            mirror.clone(),
            "{% for kv in gets(\"/test/*\") %}{{ kv.key }}={{ kv.value }};{% endfor %}",
        )
        .unwrap();
        assert_eq!(out, "/test/pass=abc;/test/user=mary;");

        let out = render(mirror, "{{ join(getvs(\"/test/*\"), \",\") }}").unwrap();
        assert_eq!(out, "abc,mary");
    }

    #[test]
    fn test_ls_and_lsdir_templates() {
        let mirror = mirror_with(&[
            ("/test/data/abc", "123"),
            ("/test/data/def/ghi", "456"),
            ("/test/data/jkl/mno", "789"),
        ]);
        let out = render(mirror.clone(), "{{ join(ls(\"/test/data\"), \" \") }}").unwrap();
        assert_eq!(out, "abc def jkl");
        let out = render(mirror, "{{ join(lsdir(\"/test/data\"), \" \") }}").unwrap();
        assert_eq!(out, "def jkl");
    }

    #[test]
    fn test_json_templates() {
        let mirror = mirror_with(&[
            ("/test/data/1", r#"{"Id":"host1", "IP":"192.168.10.11"}"#),
            ("/test/data/2", r#"{"Id":"host2", "IP":"192.168.10.12"}"#),
            ("/test/list", r#"["1", "2", "3"]"#),
        ]);
        let out = render(
            mirror.clone(),
            "{% for raw in getvs(\"/test/data/*\") %}{% set data = json(raw) %}{{ data.Id }}@{{ data.IP }} {% endfor %}",
        )
        .unwrap();
        assert_eq!(out, "host1@192.168.10.11 host2@192.168.10.12 ");

        let out = render(
            mirror.clone(),
            "{% for n in jsonArray(getv(\"/test/list\")) %}{{ n }}{% endfor %}",
        )
        .unwrap();
        assert_eq!(out, "123");

        assert!(render(mirror, "{{ json(\"[1]\") }}").is_err());
    }

    #[test]
    fn test_split_template() {
        let mirror = mirror_with(&[("/test/data", "foo:bar:baz")]);
        let out = render(
            mirror,
            "{% set data = split(getv(\"/test/data\"), \":\") %}{{ data[0] }} {{ data[1] }} {{ data[2] }}",
        )
        .unwrap();
        assert_eq!(out, "foo bar baz");
    }

    #[test]
    fn test_arithmetic_template_errors_abort_render() {
        let mirror = mirror_with(&[("/mem", "4096")]);
        let out = render(mirror.clone(), r#"{{ strdiv(getv("/mem"), 4) }}"#).unwrap();
        assert_eq!(out, "1024");
        assert!(render(mirror, r#"{{ stradd("x", 1) }}"#).is_err());
    }

    #[test]
    fn test_function_names_are_installed() {
        let mut env = Environment::new();
        FunctionLibrary::new(KvMirror::shared()).install(&mut env);
        for name in FUNCTION_NAMES {
            let source = format!("{{% if {} is defined %}}ok{{% endif %}}", name);
            assert_eq!(env.render_str(&source, context! {}).unwrap(), "ok", "{}", name);
        }
    }
}

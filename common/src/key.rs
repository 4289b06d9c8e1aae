use serde::{Deserialize, Serialize};
use std::fmt;

/// Un componente de la clave de una tarea (dataset, fold, rep, ...).
///
/// El orden entre componentes es total: los enteros van antes que el texto,
/// y dentro de cada variante se usa el orden natural.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(n) => write!(f, "{n}"),
            KeyPart::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Text(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Text(s)
    }
}

/// Identidad de una tarea: tupla ordenada de dimensiones del sweep.
///
/// En el cable viaja como un array JSON, ej: `["svm", "musk1", "rbf", 0, 3]`.
/// `Ord` es lexicográfico sobre la tupla (derivado de `Vec`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(pub Vec<KeyPart>);

impl TaskKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Primeros `depth` componentes (o la clave completa si es más corta).
    pub fn prefix(&self, depth: usize) -> Vec<KeyPart> {
        self.0.iter().take(depth).cloned().collect()
    }

    /// Nombre de archivo determinista para los resultados de esta tarea,
    /// ej: `svm_musk1_rbf_0_3.preds`.
    ///
    /// Es inyectivo: dos claves distintas nunca comparten archivo. En los
    /// componentes de texto se escapan `%`, `_`, `/` y `\` como `%XX`, y el
    /// texto vacío o que empieza como un número lleva el prefijo `%s` para no
    /// confundirse con un entero (`Text("1")` -> `%s1`, `Int(1)` -> `1`).
    pub fn filebase(&self, ext: &str) -> String {
        let stem = self
            .0
            .iter()
            .map(|p| match p {
                KeyPart::Int(n) => n.to_string(),
                KeyPart::Text(s) => escape_text(s),
            })
            .collect::<Vec<_>>()
            .join("_");
        format!("{stem}.{ext}")
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    if s.is_empty() || s.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        out.push_str("%s");
    }
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str(")")
    }
}

//! Lambda-parameter bindings visible while translating a lambda body.

use crate::ir::Shape;
use crate::translatability::{BindingLookup, Evaluation};

/// Parameters in scope, innermost last
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    frames: Vec<(String, Shape)>,
}

impl Scope {
    pub fn bind(&self, name: &str, shape: Shape) -> Scope {
        let mut scope = self.clone();
        scope.frames.push((name.to_string(), shape));
        scope
    }

    pub fn lookup(&self, name: &str) -> Option<&Shape> {
        self.frames
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }
}

impl BindingLookup for Scope {
    fn member_evaluation(&self, param: &str, path: &[&str]) -> Option<Evaluation> {
        let mut current = self.lookup(param)?;
        for segment in path {
            loop {
                match current {
                    Shape::Optional { inner, .. } => current = inner,
                    _ => break,
                }
            }
            current = match current {
                Shape::Client(_) => return Some(Evaluation::Client),
                Shape::Grouping(g) if *segment == "Key" => &g.key,
                Shape::Object(_) => match current.member(segment) {
                    Some(member) => member,
                    // Unknown members surface as errors during translation
                    None => return Some(Evaluation::Server),
                },
                _ => return Some(Evaluation::Server),
            };
        }
        Some(if current.has_client_parts() {
            Evaluation::Client
        } else {
            Evaluation::Server
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::ir::{ClientShape, SqlExpr};

    #[test]
    fn test_innermost_binding_wins() {
        let scope = Scope::default()
            .bind("m", Shape::Scalar(SqlExpr::constant(1)))
            .bind("m", Shape::Scalar(SqlExpr::constant(2)));
        assert_eq!(scope.lookup("m"), Some(&Shape::Scalar(SqlExpr::constant(2))));
        assert_eq!(scope.lookup("x"), None);
    }

    #[test]
    fn test_client_members_classify_client() {
        let client = Shape::Client(Box::new(ClientShape {
            expr: Expr::Parameter("m".to_string()),
            bindings: Vec::new(),
        }));
        let shape = Shape::Object(vec![
            ("Id".to_string(), Shape::Scalar(SqlExpr::constant(1))),
            ("Nick".to_string(), client),
        ]);
        let scope = Scope::default().bind("m", shape);
        assert_eq!(scope.member_evaluation("m", &["Id"]), Some(Evaluation::Server));
        assert_eq!(scope.member_evaluation("m", &["Nick"]), Some(Evaluation::Client));
        assert_eq!(scope.member_evaluation("m", &[]), Some(Evaluation::Client));
        assert_eq!(scope.member_evaluation("z", &[]), None);
    }
}

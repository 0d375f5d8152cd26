//! Filter pipes: `value | format('x') | upper`.
//!
//! Pipes desugar left to right into calls of resolved filters, so the
//! example above becomes `_f("upper")(_f("format")(value, 'x'))`.

use super::expr::{parse_expression, Expr, ExprError};

/// Characters after which a `/` is division, not the start of a regex.
fn ends_operand(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ')' | '.' | '+' | '-' | '_' | '$' | ']')
}

/// Split `source` at top-level pipe characters.
///
/// Pipes inside quotes, template literals, regex literals or any bracket
/// pair are not split points, and neither is `||`. Returns the trimmed
/// expression and the trimmed filter segments.
pub fn split_filters(source: &str) -> (String, Vec<String>) {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut segments = Vec::new();
    let mut last = 0;

    let mut quote: Option<char> = None;
    let mut in_regex = false;
    let (mut curly, mut square, mut paren) = (0i32, 0i32, 0i32);

    for (n, &(offset, c)) in chars.iter().enumerate() {
        let prev = n.checked_sub(1).map(|p| chars[p].1);
        let next = chars.get(n + 1).map(|&(_, ch)| ch);

        if let Some(q) = quote {
            if c == q && prev != Some('\\') {
                quote = None;
            }
            continue;
        }
        if in_regex {
            if c == '/' && prev != Some('\\') {
                in_regex = false;
            }
            continue;
        }

        match c {
            '|' if prev != Some('|') && next != Some('|') && curly == 0 && square == 0 && paren == 0 => {
                segments.push(source[last..offset].trim().to_string());
                last = offset + 1;
            }
            '"' | '\'' | '`' => quote = Some(c),
            '(' => paren += 1,
            ')' => paren -= 1,
            '[' => square += 1,
            ']' => square -= 1,
            '{' => curly += 1,
            '}' => curly -= 1,
            '/' => {
                let before = chars[..n].iter().rev().map(|&(_, ch)| ch).find(|ch| !ch.is_whitespace());
                if !before.is_some_and(ends_operand) {
                    in_regex = true;
                }
            }
            _ => {}
        }
    }
    segments.push(source[last..].trim().to_string());

    let expression = segments.remove(0);
    (expression, segments)
}

/// Parse an expression that may carry filter pipes.
pub fn parse_filtered(source: &str) -> Result<Expr, ExprError> {
    let (expression, filters) = split_filters(source);
    let mut expr = parse_expression(&expression)?;
    for filter in filters {
        expr = wrap_filter(expr, &filter)?;
    }
    Ok(expr)
}

/// Apply one filter segment (`name` or `name(args)`) to `input`.
fn wrap_filter(input: Expr, filter: &str) -> Result<Expr, ExprError> {
    let (name, extra) = match parse_expression(filter)? {
        Expr::Ident(name) => (name, Vec::new()),
        Expr::Call { callee, args } => match *callee {
            Expr::Ident(name) => (name, args),
            _ => return Err(invalid_filter(filter)),
        },
        _ => return Err(invalid_filter(filter)),
    };

    let mut args = Vec::with_capacity(extra.len() + 1);
    args.push(input);
    args.extend(extra);
    Ok(Expr::call(Expr::ResolveFilter(name), args))
}

fn invalid_filter(filter: &str) -> ExprError {
    ExprError {
        message: format!("invalid filter `{filter}`"),
        offset: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_filter_becomes_resolved_call() {
        let expr = parse_filtered("msg | upper").unwrap();
        assert_eq!(
            expr,
            Expr::call(Expr::ResolveFilter("upper".into()), vec![Expr::ident("msg")])
        );
        assert_eq!(expr.to_string(), "_f(\"upper\")(msg)");
    }

    #[test]
    fn filter_arguments_follow_the_input() {
        let expr = parse_filtered("msg | upper('x', 1)").unwrap();
        assert_eq!(
            expr,
            Expr::call(
                Expr::ResolveFilter("upper".into()),
                vec![Expr::ident("msg"), Expr::String("x".into()), Expr::Number(1.0)]
            )
        );
    }

    #[test]
    fn filters_chain_left_to_right() {
        let expr = parse_filtered("a | f | g(2)").unwrap();
        assert_eq!(expr.to_string(), "_f(\"g\")(_f(\"f\")(a),2)");
    }

    #[test]
    fn pipes_inside_literals_and_brackets_are_kept() {
        assert_eq!(split_filters("a || b").1.len(), 0);
        assert_eq!(split_filters("'a|b' | f").1, vec!["f"]);
        assert_eq!(split_filters("`x|${y}` | f").1, vec!["f"]);
        assert_eq!(split_filters("fn(a | b)").1.len(), 0);
        assert_eq!(split_filters("[a|b][0]").1.len(), 0);
        assert_eq!(split_filters("/a|b/.test(c) | f").1, vec!["f"]);
    }

    #[test]
    fn division_is_not_a_regex() {
        let (expression, filters) = split_filters("a / b | f");
        assert_eq!(expression, "a / b");
        assert_eq!(filters, vec!["f"]);
    }

    #[test]
    fn malformed_filter_is_an_error() {
        assert!(parse_filtered("a | 1").is_err());
        assert!(parse_filtered("a | f.g").is_err());
    }
}

// Parser for coefficient and condition expressions.
//
// Parses a token stream (from the lexer) into the expression AST. Uses
// chumsky combinators as a small recursive-descent grammar:
//
//   condition := sum ('<' | '<=' | '>' | '>=') sum
//   sum       := product (('+' | '-') product)*
//   product   := unary (('*' | '/') unary)*
//   unary     := ('-' | '+') unary | power
//   power     := atom ('**' unary)?          (right associative)
//   atom      := NUMBER | IMAGINARY | IDENT '(' args ')' | IDENT ('[' sum ']')+
//              | IDENT | '(' sum ')'
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors.
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult<T> {
    pub output: Option<T>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

impl<T> ParseResult<T> {
    /// The AST if lexing and parsing were both clean, else rendered errors.
    pub fn into_result(self) -> Result<T, Vec<String>> {
        match self.output {
            Some(out) if self.errors.is_empty() => Ok(out),
            _ => {
                let mut messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
                if messages.is_empty() {
                    messages.push("parse produced no output".to_string());
                }
                Err(messages)
            }
        }
    }
}

/// Parse a coefficient expression such as `-cmath.exp(-2j*pi*k/N)`.
pub fn parse_expr(source: &str) -> ParseResult<Expr> {
    let (tokens, mut errors) = lex_to_chumsky(source);
    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (output, parse_errors) = expr_parser(source)
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult { output, errors }
}

/// Parse a halting condition such as `a[i+1] >= 2.5`.
pub fn parse_condition(source: &str) -> ParseResult<Condition> {
    let (tokens, mut errors) = lex_to_chumsky(source);
    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (output, parse_errors) = condition_parser(source)
        .then_ignore(end())
        .parse(stream)
        .into_output_errors();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult { output, errors }
}

/// Lex and convert spans; lex errors become `Rich::custom` errors.
fn lex_to_chumsky(
    source: &str,
) -> (
    Vec<(Token, SimpleSpan)>,
    Vec<Rich<'static, Token, SimpleSpan>>,
) {
    let lex_result = crate::lexer::lex(source);
    let tokens = lex_result
        .tokens
        .into_iter()
        .map(|(tok, span)| {
            let cspan: SimpleSpan = (span.start..span.end).into();
            (tok, cspan)
        })
        .collect();
    let errors = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    (tokens, errors)
}

// ── Grammar ──
//
// Rules are built inside one function so the `source` reference is captured
// once and shared by all combinators.

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Expr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    recursive(move |expr| {
        let ident = just(Token::Ident).map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            (source[span.start()..span.end()].to_string(), span)
        });

        let literal = select! {
            Token::Number(n) = e => Expr::new(ExprKind::Number(n), e.span()),
            Token::Imaginary(n) = e => Expr::new(ExprKind::Imaginary(n), e.span()),
        };

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let subscripts = expr
            .clone()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .repeated()
            .at_least(1)
            .collect::<Vec<_>>();

        let call = ident
            .clone()
            .then(args)
            .map_with(|((func, _), args), e| Expr::new(ExprKind::Call { func, args }, e.span()));

        let index = ident.clone().then(subscripts).map_with(|((name, _), indices), e| {
            Expr::new(ExprKind::Index { name, indices }, e.span())
        });

        let name = ident.map(|(name, span)| Expr::new(ExprKind::Name(name), span));

        let parenthesized = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = literal.or(call).or(index).or(name).or(parenthesized);

        let unary = recursive(move |unary| {
            let power = atom
                .clone()
                .then(just(Token::Pow).ignore_then(unary.clone()).or_not())
                .map_with(|(base, exponent), e| match exponent {
                    Some(exponent) => Expr::new(
                        ExprKind::Binary {
                            op: BinOp::Pow,
                            lhs: Box::new(base),
                            rhs: Box::new(exponent),
                        },
                        e.span(),
                    ),
                    None => base,
                });

            choice((
                just(Token::Minus).to(UnaryOp::Neg),
                just(Token::Plus).to(UnaryOp::Plus),
            ))
            .then(unary)
            .map_with(|(op, operand), e| {
                Expr::new(
                    ExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                    e.span(),
                )
            })
            .or(power)
        });

        let product = unary.clone().foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
            ))
            .then(unary)
            .repeated(),
            binary,
        );

        product.clone().foldl(
            choice((
                just(Token::Plus).to(BinOp::Add),
                just(Token::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            binary,
        )
    })
}

fn condition_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Condition, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let comparison = select! {
        Token::Lt => CmpOp::Lt,
        Token::Le => CmpOp::Le,
        Token::Gt => CmpOp::Gt,
        Token::Ge => CmpOp::Ge,
    };

    expr_parser(source)
        .then(comparison)
        .then(expr_parser(source))
        .map_with(|((lhs, op), rhs), e| Condition {
            lhs,
            op,
            rhs,
            span: e.span(),
        })
}

/// Left-fold step for binary operator chains.
fn binary(lhs: Expr, (op, rhs): (BinOp, Expr)) -> Expr {
    let span: SimpleSpan = (lhs.span.start()..rhs.span.end()).into();
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Expr {
        parse_expr(source)
            .into_result()
            .unwrap_or_else(|errs| panic!("parse errors for {source:?}: {errs:?}"))
    }

    fn render(source: &str) -> String {
        parse_ok(source).to_string()
    }

    #[test]
    fn literal_and_name() {
        assert_eq!(parse_ok("2.5").kind, ExprKind::Number(2.5));
        assert_eq!(parse_ok("k").kind, ExprKind::Name("k".into()));
        assert_eq!(parse_ok("3j").kind, ExprKind::Imaginary(3.0));
    }

    #[test]
    fn precedence_mul_over_add() {
        assert_eq!(render("1 + 2 * k"), "(1 + (2 * k))");
        assert_eq!(render("a - b - c"), "((a - b) - c)");
        assert_eq!(render("a / b * c"), "((a / b) * c)");
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(render("2 ** 3 ** 2"), "(2 ** (3 ** 2))");
        assert_eq!(render("-x ** 2"), "(-(x ** 2))");
        assert_eq!(render("2 ^ -1"), "(2 ** (-1))");
    }

    #[test]
    fn dotted_call_with_complex_argument() {
        assert_eq!(
            render("-cmath.exp(-2j*math.pi*k*m/N)"),
            "(-cmath.exp((((((-2j) * math.pi) * k) * m) / N)))"
        );
    }

    #[test]
    fn call_with_several_arguments() {
        assert_eq!(render("polar(1, theta)"), "polar(1, theta)");
        assert_eq!(render("f()"), "f()");
    }

    #[test]
    fn indexed_reference() {
        let expr = parse_ok("rows[i + 1][0]");
        let ExprKind::Index { name, indices } = &expr.kind else {
            panic!("expected index, got {expr:?}");
        };
        assert_eq!(name, "rows");
        assert_eq!(indices.len(), 2);
        assert_eq!(indices[0].to_string(), "(i + 1)");
    }

    #[test]
    fn spans_cover_whole_binary() {
        let expr = parse_ok("a + bc");
        assert_eq!(expr.span.start(), 0);
        assert_eq!(expr.span.end(), 6);
    }

    #[test]
    fn condition_forms() {
        for (src, op) in [
            ("x < 5", CmpOp::Lt),
            ("x <= 5", CmpOp::Le),
            ("x > 5", CmpOp::Gt),
            ("x >= 5", CmpOp::Ge),
        ] {
            let cond = parse_condition(src).into_result().unwrap();
            assert_eq!(cond.op, op);
            assert_eq!(cond.lhs.kind, ExprKind::Name("x".into()));
            assert_eq!(cond.rhs.kind, ExprKind::Number(5.0));
        }
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        assert!(parse_expr("1 + 2 )").into_result().is_err());
        assert!(parse_expr("1 +").into_result().is_err());
    }

    #[test]
    fn lex_error_fails_parse() {
        assert!(parse_expr("2 $ 3").into_result().is_err());
    }

    #[test]
    fn condition_without_comparison_is_an_error() {
        assert!(parse_condition("x + 1").into_result().is_err());
        assert!(parse_condition("x < 1 < 2").into_result().is_err());
    }
}

//! Recursive descent parser for path pattern text.
//!
//! ```text
//! path      := node (rel node)*
//! node      := '(' ident? (':' ident)* props? ')'
//! rel       := ('-' | '<-') ('[' ident? (':' ident ('|' ident)*)? hops? props? ']')? ('->' | '-')
//! hops      := '*' int? ('..' int?)?
//! props     := '{' (ident ':' literal (',' ident ':' literal)*)? '}'
//! ```

use crate::model::{Direction, Value};
use crate::{Error, Result};
use super::lexer::{tokenize, Token, TokenKind};
use super::{NodePattern, PathPattern, PropertyConstraint, RelationshipPattern};

/// Parser state: wraps a token slice with cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            let tok = self.peek();
            Err(self.error(format!("expected {kind:?}, got {:?} '{}'", tok.kind, tok.text)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.clone())
    }

    fn error(&self, message: String) -> Error {
        Error::PatternSyntax { position: self.peek().span.start, message }
    }
}

/// Parse a full path pattern; trailing tokens are an error.
pub fn parse(text: &str) -> Result<PathPattern> {
    let tokens = tokenize(text)?;
    let mut p = Parser::new(&tokens);

    let mut pattern = PathPattern::new(parse_node(&mut p)?);
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        let rel = parse_relationship(&mut p)?;
        let node = parse_node(&mut p)?;
        pattern.segments.push((rel, node));
    }

    if !p.at(TokenKind::Eof) {
        let tok = p.peek();
        return Err(p.error(format!("unexpected '{}' after pattern", tok.text)));
    }
    Ok(pattern)
}

fn parse_node(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;
    let mut node = NodePattern::any();

    if p.at(TokenKind::Identifier) {
        node.variable = Some(p.ident()?);
    }
    while p.eat(TokenKind::Colon) {
        node.labels.push(p.ident()?);
    }
    if p.at(TokenKind::LBrace) {
        node.properties = parse_properties(p)?;
    }

    p.expect(TokenKind::RParen)?;
    Ok(node)
}

fn parse_relationship(p: &mut Parser) -> Result<RelationshipPattern> {
    let incoming = p.eat(TokenKind::LeftArrow);
    if !incoming {
        p.expect(TokenKind::Dash)?;
    }

    let mut rel = RelationshipPattern::default();
    if p.eat(TokenKind::LBracket) {
        if p.at(TokenKind::Identifier) {
            rel.variable = Some(p.ident()?);
        }
        if p.eat(TokenKind::Colon) {
            rel.types.push(p.ident()?);
            while p.eat(TokenKind::Pipe) {
                // `:A|:B` is accepted as well as `:A|B`
                p.eat(TokenKind::Colon);
                rel.types.push(p.ident()?);
            }
        }
        if p.eat(TokenKind::Star) {
            parse_hops(p, &mut rel)?;
        }
        if p.at(TokenKind::LBrace) {
            rel.properties = parse_properties(p)?;
        }
        p.expect(TokenKind::RBracket)?;
    }

    rel.direction = if incoming {
        if p.at(TokenKind::Arrow) {
            return Err(p.error("relationship cannot point both ways".into()));
        }
        p.expect(TokenKind::Dash)?;
        Direction::Incoming
    } else if p.eat(TokenKind::Arrow) {
        Direction::Outgoing
    } else {
        p.expect(TokenKind::Dash)?;
        Direction::Both
    };
    Ok(rel)
}

fn parse_hops(p: &mut Parser, rel: &mut RelationshipPattern) -> Result<()> {
    let min = optional_count(p)?;
    if p.eat(TokenKind::DotDot) {
        let max = optional_count(p)?;
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(p.error(format!("empty hop range *{lo}..{hi}")));
            }
        }
        rel.min_hops = Some(min.unwrap_or(1));
        rel.max_hops = max;
    } else {
        // `*n` is exactly n hops; a bare `*` is 1..unbounded
        rel.min_hops = Some(min.unwrap_or(1));
        rel.max_hops = min;
    }
    Ok(())
}

fn optional_count(p: &mut Parser) -> Result<Option<usize>> {
    if !p.at(TokenKind::Integer) {
        return Ok(None);
    }
    let text = p.peek().text.clone();
    let n = text
        .parse::<usize>()
        .map_err(|_| p.error(format!("hop count must be a non-negative integer, got {text}")))?;
    p.advance();
    Ok(Some(n))
}

fn parse_properties(p: &mut Parser) -> Result<Vec<PropertyConstraint>> {
    p.expect(TokenKind::LBrace)?;
    let mut out = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.ident()?;
            p.expect(TokenKind::Colon)?;
            out.push(PropertyConstraint::eq(key, parse_literal(p)?));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(out)
}

fn parse_literal(p: &mut Parser) -> Result<Value> {
    let tok = p.peek().clone();
    let value = match tok.kind {
        TokenKind::StringLiteral => Value::String(tok.text),
        TokenKind::Integer => tok
            .text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| p.error(format!("invalid integer {}: {e}", tok.text)))?,
        TokenKind::Float => tok
            .text
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| p.error(format!("invalid float {}: {e}", tok.text)))?,
        TokenKind::True => Value::Bool(true),
        TokenKind::False => Value::Bool(false),
        TokenKind::Null => Value::Null,
        _ => return Err(p.error(format!("expected a literal, got '{}'", tok.text))),
    };
    p.advance();
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_simple_hop() {
        let pattern = parse("(p:Person)-[:KNOWS]->(q:Person)").unwrap();
        let expected = PathPattern::new(NodePattern::var("p").label("Person")).then(
            RelationshipPattern::outgoing().edge_type("KNOWS"),
            NodePattern::var("q").label("Person"),
        );
        assert_eq!(pattern, expected);
    }

    #[test]
    fn test_full_relationship() {
        let pattern = parse("(a {name: 'Alice', age: 30})<-[r:KNOWS|LIKES *1..3 {since: 2020}]-(b)").unwrap();
        assert_eq!(pattern.start.properties.len(), 2);
        let (rel, node) = &pattern.segments[0];
        assert_eq!(rel.variable.as_deref(), Some("r"));
        assert_eq!(rel.types, vec!["KNOWS", "LIKES"]);
        assert_eq!(rel.direction, Direction::Incoming);
        assert_eq!((rel.min_hops, rel.max_hops), (Some(1), Some(3)));
        assert_eq!(rel.properties, vec![PropertyConstraint::eq("since", 2020)]);
        assert_eq!(node.variable.as_deref(), Some("b"));
    }

    #[test]
    fn test_hop_forms() {
        let hops = |text: &str| {
            let pattern = parse(text).unwrap();
            let rel = &pattern.segments[0].0;
            (rel.min_hops, rel.max_hops)
        };
        assert_eq!(hops("(a)-[*]->(b)"), (Some(1), None));
        assert_eq!(hops("(a)-[*2]->(b)"), (Some(2), Some(2)));
        assert_eq!(hops("(a)-[*..4]->(b)"), (Some(1), Some(4)));
        assert_eq!(hops("(a)-[*2..]->(b)"), (Some(2), None));
        assert_eq!(hops("(a)-->(b)"), (None, None));
    }

    #[test]
    fn test_undirected_and_bare() {
        let pattern = parse("(a)--(b)-[]->()").unwrap();
        assert_eq!(pattern.segments[0].0.direction, Direction::Both);
        assert_eq!(pattern.segments[1].0.direction, Direction::Outgoing);
        assert_eq!(pattern.segments[1].1, NodePattern::any());
    }

    #[test]
    fn test_errors_carry_position() {
        assert!(matches!(parse("(a)-[:KNOWS->(b)"), Err(Error::PatternSyntax { position: 11, .. })));
        assert!(matches!(parse("(a) extra"), Err(Error::PatternSyntax { .. })));
        assert!(parse("(a)-[*3..1]->(b)").is_err());
        assert!(parse("(a)<-[]->(b)").is_err());
    }
}

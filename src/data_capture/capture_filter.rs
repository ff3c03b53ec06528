//! # Capture Filter
//!
//! A small boolean expression language evaluated against decoded frames, in
//! the spirit of the classic packet-filter syntax:
//!
//! ```text
//! expr     := and_expr ("or" and_expr)*
//! and_expr := primary ("and" primary)*
//! primary  := "tcp" | "udp" | "port" <u16> | "host" <ip>
//!           | "(" expr ")" | "not" primary
//! ```
//!
//! Keywords are case-insensitive. An empty expression accepts every frame.

use std::net::IpAddr;

use super::frame_parser::{ParsedFrame, Transport};
use crate::error_handling::types::CaptureError;

pub const DEFAULT_FILTER: &str = "udp or tcp";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Any,
    Proto(Transport),
    Port(u16),
    Host(IpAddr),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, frame: &ParsedFrame) -> bool {
        match self {
            Expr::Any => true,
            Expr::Proto(t) => frame.transport == *t,
            Expr::Port(p) => frame.src_port == *p || frame.dst_port == *p,
            Expr::Host(ip) => frame.src_ip == *ip || frame.dst_ip == *ip,
            Expr::Not(inner) => !inner.eval(frame),
            Expr::And(a, b) => a.eval(frame) && b.eval(frame),
            Expr::Or(a, b) => a.eval(frame) || b.eval(frame),
        }
    }
}

/// A compiled filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFilter {
    expr: Expr,
}

impl CaptureFilter {
    /// Compiles `source`, returning [`CaptureError::InvalidFilter`] on any
    /// unknown keyword, malformed operand or trailing token.
    pub fn parse(source: &str) -> Result<Self, CaptureError> {
        let tokens = tokenize(source);
        if tokens.is_empty() {
            return Ok(Self { expr: Expr::Any });
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            source,
        };
        let expr = parser.expr()?;
        if let Some(extra) = parser.peek() {
            return Err(parser.error(&format!("unexpected token '{}'", extra)));
        }
        Ok(Self { expr })
    }

    pub fn matches(&self, frame: &ParsedFrame) -> bool {
        self.expr.eval(frame)
    }
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self {
            expr: Expr::Or(
                Box::new(Expr::Proto(Transport::Udp)),
                Box::new(Expr::Proto(Transport::Tcp)),
            ),
        }
    }
}

fn tokenize(source: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in source.chars() {
        match c {
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(t) if t.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn error(&self, reason: &str) -> CaptureError {
        CaptureError::InvalidFilter(format!("{} in '{}'", reason, self.source))
    }

    fn expr(&mut self) -> Result<Expr, CaptureError> {
        let mut lhs = self.and_expr()?;
        while self.eat_keyword("or") {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, CaptureError> {
        let mut lhs = self.primary()?;
        while self.eat_keyword("and") {
            let rhs = self.primary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, CaptureError> {
        let token = self
            .next()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        match token.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Expr::Proto(Transport::Tcp)),
            "udp" => Ok(Expr::Proto(Transport::Udp)),
            "not" => Ok(Expr::Not(Box::new(self.primary()?))),
            "port" => {
                let operand = self.next().ok_or_else(|| self.error("missing port"))?;
                operand
                    .parse::<u16>()
                    .map(Expr::Port)
                    .map_err(|_| self.error(&format!("invalid port '{}'", operand)))
            }
            "host" => {
                let operand = self.next().ok_or_else(|| self.error("missing host"))?;
                operand
                    .parse::<IpAddr>()
                    .map(Expr::Host)
                    .map_err(|_| self.error(&format!("invalid host '{}'", operand)))
            }
            "(" => {
                let inner = self.expr()?;
                match self.next() {
                    Some(")") => Ok(inner),
                    _ => Err(self.error("unbalanced parenthesis")),
                }
            }
            other => Err(self.error(&format!("unknown keyword '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::types::MacAddr;
    use std::net::Ipv4Addr;

    fn frame(transport: Transport, src_port: u16, dst_port: u16) -> ParsedFrame {
        ParsedFrame {
            src_mac: MacAddr([2, 0, 0, 0, 0, 1]),
            dst_mac: MacAddr([2, 0, 0, 0, 0, 2]),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            transport,
            src_port,
            dst_port,
        }
    }

    #[test]
    fn test_default_filter_accepts_tcp_and_udp() {
        let filter = CaptureFilter::parse(DEFAULT_FILTER).unwrap();
        assert_eq!(filter, CaptureFilter::default());
        assert!(filter.matches(&frame(Transport::Tcp, 1, 2)));
        assert!(filter.matches(&frame(Transport::Udp, 1, 2)));
    }

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = CaptureFilter::parse("   ").unwrap();
        assert!(filter.matches(&frame(Transport::Udp, 1, 2)));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        // and binds tighter than or
        let filter = CaptureFilter::parse("udp or tcp and port 443").unwrap();
        assert!(filter.matches(&frame(Transport::Udp, 1, 2)));
        assert!(!filter.matches(&frame(Transport::Tcp, 1, 2)));
        assert!(filter.matches(&frame(Transport::Tcp, 443, 2)));

        let filter = CaptureFilter::parse("(udp or tcp) and port 443").unwrap();
        assert!(!filter.matches(&frame(Transport::Udp, 1, 2)));
        assert!(filter.matches(&frame(Transport::Udp, 1, 443)));
    }

    #[test]
    fn test_host_and_not() {
        let filter = CaptureFilter::parse("TCP AND NOT host 10.0.0.5").unwrap();
        assert!(!filter.matches(&frame(Transport::Tcp, 1, 2)));

        let filter = CaptureFilter::parse("host 192.168.1.10").unwrap();
        assert!(filter.matches(&frame(Transport::Udp, 1, 2)));
    }

    #[test]
    fn test_invalid_expressions() {
        for source in [
            "icmp",
            "port",
            "port 70000",
            "host nowhere",
            "(tcp or udp",
            "tcp udp",
            "tcp and",
            ")",
        ] {
            match CaptureFilter::parse(source) {
                Err(CaptureError::InvalidFilter(_)) => {}
                other => panic!("'{}' should be rejected, got {:?}", source, other),
            }
        }
    }
}

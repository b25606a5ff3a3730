//! XPath evaluation for `xmlParse` variables.
//!
//! Expressions are XPath 1.0, evaluated by `sxd-xpath` against the request
//! body. Before the body is parsed into a tree it is streamed once through
//! quick-xml, which bounds the element nesting depth and collects the
//! `xmlns:prefix` declarations. Those prefixes are bound in the evaluation
//! context, so `/soap:Envelope/soap:Body` works without configuration.
//! When one prefix is declared more than once, the first declaration wins.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use sxd_document::parser;
use sxd_xpath::{Context, Factory};
use thiserror::Error;

/// Deepest element nesting accepted in a request body.
pub const MAX_DEPTH: usize = 100;

/// Errors from parsing the document or evaluating the expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum XPathError {
    #[error("invalid XML: {0}")]
    Xml(String),

    #[error("invalid XPath expression {expr:?}: {reason}")]
    Syntax { expr: String, reason: String },

    #[error("XPath expression {expr:?} failed: {reason}")]
    Evaluation { expr: String, reason: String },
}

/// Parse `xml` and evaluate `expression` against it, returning the XPath
/// string value of the result. A node-set yields the string value of its
/// first node in document order.
pub fn evaluate(xml: &str, expression: &str) -> Result<String, XPathError> {
    let xpath = compile(expression)?;
    let namespaces = scan(xml)?;

    let package = parser::parse(xml).map_err(|e| XPathError::Xml(format!("{:?}", e)))?;
    let document = package.as_document();

    let mut context = Context::new();
    for (prefix, uri) in &namespaces {
        context.set_namespace(prefix, uri);
    }

    let value = xpath
        .evaluate(&context, document.root())
        .map_err(|e| XPathError::Evaluation {
            expr: expression.to_string(),
            reason: format!("{:?}", e),
        })?;
    Ok(value.string())
}

fn compile(expression: &str) -> Result<sxd_xpath::XPath, XPathError> {
    let syntax = |reason: String| XPathError::Syntax {
        expr: expression.to_string(),
        reason,
    };
    if expression.trim().is_empty() {
        return Err(syntax("empty expression".to_string()));
    }
    Factory::new()
        .build(expression)
        .map_err(|e| syntax(format!("{:?}", e)))?
        .ok_or_else(|| syntax("empty expression".to_string()))
}

fn xml_err(e: impl std::fmt::Display) -> XPathError {
    XPathError::Xml(e.to_string())
}

/// Stream the document, rejecting nesting deeper than [`MAX_DEPTH`] and
/// returning the namespace prefixes it declares.
fn scan(xml: &str) -> Result<BTreeMap<String, String>, XPathError> {
    let mut reader = Reader::from_str(xml);
    let mut namespaces = BTreeMap::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(element) => {
                depth += 1;
                check_depth(depth)?;
                collect_namespaces(&element, &mut namespaces)?;
            }
            Event::Empty(element) => {
                check_depth(depth + 1)?;
                collect_namespaces(&element, &mut namespaces)?;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => return Ok(namespaces),
            _ => {}
        }
    }
}

fn check_depth(depth: usize) -> Result<(), XPathError> {
    if depth > MAX_DEPTH {
        return Err(XPathError::Xml(format!(
            "element nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }
    Ok(())
}

fn collect_namespaces(
    element: &BytesStart<'_>,
    namespaces: &mut BTreeMap<String, String>,
) -> Result<(), XPathError> {
    for attr in element.attributes() {
        let attr = attr.map_err(xml_err)?;
        if let Some(prefix) = attr.key.as_ref().strip_prefix(b"xmlns:") {
            namespaces
                .entry(String::from_utf8_lossy(prefix).into_owned())
                .or_insert_with(|| String::from_utf8_lossy(&attr.value).into_owned());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<order id="A-17" status="open">
  <customer>
    <name>Bob &amp; Co</name>
    <email>bob@example.com</email>
  </customer>
  <items>
    <item sku="x1"><qty>2</qty><title>Widget</title></item>
    <item sku="x2"><qty>5</qty><title>Gadget</title></item>
    <item sku="x3"><qty>1</qty><title><![CDATA[<Gizmo>]]></title></item>
  </items>
</order>"#;

    fn eval(expr: &str) -> String {
        evaluate(ORDER, expr).unwrap()
    }

    fn nested(levels: usize, leaf: &str) -> String {
        format!(
            "{}{}{}",
            "<a>".repeat(levels),
            leaf,
            "</a>".repeat(levels)
        )
    }

    #[test]
    fn test_absolute_and_relative_paths() {
        assert_eq!(eval("/order/customer/name"), "Bob & Co");
        assert_eq!(eval("order/customer/email"), "bob@example.com");
        assert_eq!(eval("/order/customer/email/text()"), "bob@example.com");
    }

    #[test]
    fn test_first_match_in_document_order() {
        assert_eq!(eval("/order/items/item/title"), "Widget");
        assert_eq!(eval("//title"), "Widget");
    }

    #[test]
    fn test_attributes() {
        assert_eq!(eval("/order/@id"), "A-17");
        assert_eq!(eval("//item[2]/@sku"), "x2");
        assert_eq!(eval("/order/@missing"), "");
    }

    #[test]
    fn test_predicates() {
        assert_eq!(eval("//item[@sku='x2']/qty"), "5");
        assert_eq!(eval("//item[last()]/title"), "<Gizmo>");
        assert_eq!(eval("//item[title='Gadget']/@sku"), "x2");
        assert_eq!(eval("//qty[. > 3]"), "5");
        assert_eq!(eval("//item[9]"), "");
    }

    #[test]
    fn test_core_functions() {
        assert_eq!(eval("count(//item)"), "3");
        assert_eq!(eval("count(//nothing)"), "0");
        assert_eq!(eval("sum(//qty)"), "8");
        assert_eq!(eval("string(//email)"), "bob@example.com");
        assert_eq!(eval("concat(//item[1]/title, '-x')"), "Widget-x");
        assert_eq!(eval("//item[contains(title, 'dg')]/@sku"), "x2");
        assert_eq!(eval("//*[local-name()='email']"), "bob@example.com");
        assert_eq!(
            eval("normalize-space(/order/customer)"),
            "Bob & Co bob@example.com"
        );
    }

    #[test]
    fn test_parent_and_self_steps() {
        assert_eq!(eval("//qty/../title"), "Widget");
        assert_eq!(eval("/order/customer/./name"), "Bob & Co");
    }

    #[test]
    fn test_missing_path_is_empty() {
        assert_eq!(eval("/order/shipping/address"), "");
    }

    #[test]
    fn test_declared_prefixes_are_bound() {
        let xml = r#"<soap:Envelope xmlns:soap="urn:x"><soap:Body><id>9</id></soap:Body></soap:Envelope>"#;
        assert_eq!(evaluate(xml, "/soap:Envelope/soap:Body/id").unwrap(), "9");
        assert_eq!(evaluate(xml, "//*[local-name()='Body']/id").unwrap(), "9");
        assert_eq!(evaluate(xml, "/Envelope/Body/id").unwrap(), "");
    }

    #[test]
    fn test_invalid_xml() {
        assert!(matches!(evaluate("<a><b></a>", "/a"), Err(XPathError::Xml(_))));
        assert!(matches!(evaluate("<a>", "/a"), Err(XPathError::Xml(_))));
        assert!(matches!(evaluate("not xml", "/a"), Err(XPathError::Xml(_))));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let hostile = nested(200_000, "<b/>");
        assert!(matches!(evaluate(&hostile, "//b"), Err(XPathError::Xml(_))));

        let too_deep = nested(MAX_DEPTH, "<b>x</b>");
        assert!(matches!(evaluate(&too_deep, "//b"), Err(XPathError::Xml(_))));
    }

    #[test]
    fn test_nesting_at_limit_is_evaluated() {
        let xml = nested(MAX_DEPTH - 1, "<b>deep</b>");
        assert_eq!(evaluate(&xml, "//b").unwrap(), "deep");
        assert_eq!(evaluate(&xml, "count(//a)").unwrap(), (MAX_DEPTH - 1).to_string());
    }

    #[test]
    fn test_invalid_expression() {
        assert!(matches!(evaluate(ORDER, ""), Err(XPathError::Syntax { .. })));
        assert!(matches!(evaluate(ORDER, "/order["), Err(XPathError::Syntax { .. })));
        assert!(evaluate(ORDER, "no-such-function(1)").is_err());
    }
}

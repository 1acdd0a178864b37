//! Stylesheet merging for recipient digests.
//!
//! Only qualified rules (`selector { declarations }`) are kept; at-rules are
//! dropped. Rules are keyed by their selector text.

use cssparser::{
  AtRuleParser, ParseError, Parser, ParserInput, ParserState, QualifiedRuleParser,
  StyleSheetParser,
};

/// Merge `default` and `user` sheets. A selector defined in both takes the
/// user's declarations but keeps its first position.
pub fn merge_stylesheets(default: Option<&str>, user: Option<&str>) -> String {
  let mut merged: Vec<(String, String)> = Vec::new();

  for sheet in [default, user].into_iter().flatten() {
    for (selector, rule) in qualified_rules(sheet) {
      match merged.iter_mut().find(|(s, _)| *s == selector) {
        Some(existing) => existing.1 = rule,
        None => merged.push((selector, rule)),
      }
    }
  }

  merged
    .into_iter()
    .map(|(_, rule)| format!("\n{}", rule))
    .collect()
}

fn qualified_rules(css: &str) -> Vec<(String, String)> {
  let mut input = ParserInput::new(css);
  let mut parser = Parser::new(&mut input);
  let mut collector = RuleCollector;

  StyleSheetParser::new(&mut parser, &mut collector)
    .filter_map(|rule| rule.ok())
    .collect()
}

/// Keeps each qualified rule as (normalized selector, rendered rule).
/// At-rules are rejected by the default `AtRuleParser` methods, so the sheet
/// parser skips them.
struct RuleCollector;

/// Consume the rest of `input` and return its source text.
fn rest_of<'i>(input: &mut Parser<'i, '_>) -> &'i str {
  let start = input.position();
  while input.next_including_whitespace_and_comments().is_ok() {}
  input.slice_from(start)
}

impl<'i> QualifiedRuleParser<'i> for RuleCollector {
  type Prelude = String;
  type QualifiedRule = (String, String);
  type Error = ();

  fn parse_prelude<'t>(
    &mut self,
    input: &mut Parser<'i, 't>,
  ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
    let selector = rest_of(input).split_whitespace().collect::<Vec<_>>().join(" ");
    if selector.is_empty() {
      return Err(input.new_custom_error(()));
    }
    Ok(selector)
  }

  fn parse_block<'t>(
    &mut self,
    selector: Self::Prelude,
    _start: &ParserState,
    input: &mut Parser<'i, 't>,
  ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
    let body = rest_of(input).trim();
    let rule = format!("{} {{\n    {}\n}}", selector, body);
    Ok((selector, rule))
  }
}

impl<'i> AtRuleParser<'i> for RuleCollector {
  type Prelude = ();
  type AtRule = (String, String);
  type Error = ();
}

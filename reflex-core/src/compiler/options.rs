//! Parser and compiler configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::ast::Namespace;
use super::errors::DiagnosticSink;

/// A yes/no question about a tag name.
pub type TagPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Decodes character references in text. The flag is set for attribute
/// values.
pub type EntityDecoder = Arc<dyn Fn(&str, bool) -> String + Send + Sync>;

/// Picks the namespace of a tag given its parent's namespace and tag.
pub type NamespaceResolver = Arc<dyn Fn(&str, Option<(&str, Namespace)>) -> Namespace + Send + Sync>;

/// How the parser treats whitespace between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Whitespace {
    /// Drop insignificant runs and collapse the rest to a single space.
    #[default]
    Condense,
    /// Keep text exactly as written.
    Preserve,
}

#[derive(Clone)]
pub struct ParserOptions {
    pub delimiters: (String, String),
    pub is_void_tag: TagPredicate,
    pub is_pre_tag: TagPredicate,
    /// When set, any tag it rejects is a component.
    pub is_native_tag: Option<TagPredicate>,
    pub is_custom_element: TagPredicate,
    /// Content is not markup and entities are not decoded (`<script>`).
    pub is_raw_text_tag: TagPredicate,
    /// Content is not markup but entities are decoded (`<textarea>`).
    pub is_rcdata_tag: TagPredicate,
    pub get_namespace: NamespaceResolver,
    pub decode_entities: EntityDecoder,
    pub whitespace: Whitespace,
    /// Keep comment nodes in the tree.
    pub comments: bool,
    pub on_error: Option<DiagnosticSink>,
}

fn never() -> TagPredicate {
    Arc::new(|_| false)
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiters: ("{{".to_string(), "}}".to_string()),
            is_void_tag: never(),
            is_pre_tag: never(),
            is_native_tag: None,
            is_custom_element: never(),
            is_raw_text_tag: never(),
            is_rcdata_tag: never(),
            get_namespace: Arc::new(|_, parent| parent.map(|(_, ns)| ns).unwrap_or_default()),
            decode_entities: Arc::new(|raw, _| decode_basic_entities(raw)),
            whitespace: Whitespace::Condense,
            comments: false,
            on_error: None,
        }
    }
}

impl ParserOptions {
    /// Options for HTML templates: void, pre, raw-text and namespace rules,
    /// plus numeric character references.
    pub fn html() -> Self {
        Self {
            is_void_tag: Arc::new(is_void_tag),
            is_pre_tag: Arc::new(|tag| tag == "pre"),
            is_native_tag: Some(Arc::new(|tag| is_html_tag(tag) || is_svg_tag(tag))),
            is_raw_text_tag: Arc::new(|tag| matches!(tag, "script" | "style" | "iframe" | "noscript")),
            is_rcdata_tag: Arc::new(|tag| matches!(tag, "textarea" | "title")),
            get_namespace: Arc::new(html_namespace),
            decode_entities: Arc::new(|raw, _| decode_html_entities(raw)),
            ..Self::default()
        }
    }

    /// Hash of the options that can be compared. Predicates are not part of
    /// the fingerprint.
    pub fn fingerprint<H: Hasher>(&self, state: &mut H) {
        self.delimiters.hash(state);
        self.whitespace.hash(state);
        self.comments.hash(state);
        self.is_native_tag.is_some().hash(state);
    }

    pub(crate) fn is_reserved_tag(&self, tag: &str) -> bool {
        match &self.is_native_tag {
            Some(is_native) => is_native(tag),
            None => is_html_tag(tag) || is_svg_tag(tag),
        }
    }
}

impl fmt::Debug for ParserOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserOptions")
            .field("delimiters", &self.delimiters)
            .field("whitespace", &self.whitespace)
            .field("comments", &self.comments)
            .field("is_native_tag", &self.is_native_tag.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything the compiler needs beyond parsing.
#[derive(Clone, Debug)]
pub struct CompilerOptions {
    pub parser: ParserOptions,
    /// Extra key aliases for key modifiers (`@keyup.f1`), by alias.
    pub key_codes: BTreeMap<String, Vec<u32>>,
    /// Report loops over components that have no `key`.
    pub warn_unkeyed_component_loops: bool,
    /// Custom directive names that are carried into node data unchanged.
    /// Unknown directives are carried as well; listing them here only
    /// silences the unknown-directive debug log.
    pub directives: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            parser: ParserOptions::html(),
            key_codes: BTreeMap::new(),
            warn_unkeyed_component_loops: true,
            directives: Vec::new(),
        }
    }
}

/// Field-by-field overrides for [`CompilerOptions::merge`]. Unset fields
/// keep the base value.
#[derive(Clone, Default)]
pub struct CompilerOverrides {
    pub delimiters: Option<(String, String)>,
    pub is_void_tag: Option<TagPredicate>,
    pub is_pre_tag: Option<TagPredicate>,
    pub is_native_tag: Option<TagPredicate>,
    pub is_custom_element: Option<TagPredicate>,
    pub decode_entities: Option<EntityDecoder>,
    pub get_namespace: Option<NamespaceResolver>,
    pub whitespace: Option<Whitespace>,
    pub comments: Option<bool>,
    pub on_error: Option<DiagnosticSink>,
    pub key_codes: BTreeMap<String, Vec<u32>>,
    pub warn_unkeyed_component_loops: Option<bool>,
    pub directives: Vec<String>,
}

impl CompilerOptions {
    /// Combine `base` with `overrides`.
    ///
    /// Scalars and predicates replace the base when set. Key codes merge per
    /// alias with the override winning. Directive names concatenate.
    pub fn merge(base: &CompilerOptions, overrides: CompilerOverrides) -> CompilerOptions {
        let mut merged = base.clone();
        let parser = &mut merged.parser;

        if let Some(delimiters) = overrides.delimiters {
            parser.delimiters = delimiters;
        }
        if let Some(pred) = overrides.is_void_tag {
            parser.is_void_tag = pred;
        }
        if let Some(pred) = overrides.is_pre_tag {
            parser.is_pre_tag = pred;
        }
        if let Some(pred) = overrides.is_native_tag {
            parser.is_native_tag = Some(pred);
        }
        if let Some(pred) = overrides.is_custom_element {
            parser.is_custom_element = pred;
        }
        if let Some(decoder) = overrides.decode_entities {
            parser.decode_entities = decoder;
        }
        if let Some(resolver) = overrides.get_namespace {
            parser.get_namespace = resolver;
        }
        if let Some(whitespace) = overrides.whitespace {
            parser.whitespace = whitespace;
        }
        if let Some(comments) = overrides.comments {
            parser.comments = comments;
        }
        if let Some(sink) = overrides.on_error {
            parser.on_error = Some(sink);
        }

        merged.key_codes.extend(overrides.key_codes);
        if let Some(warn) = overrides.warn_unkeyed_component_loops {
            merged.warn_unkeyed_component_loops = warn;
        }
        for name in overrides.directives {
            if !merged.directives.contains(&name) {
                merged.directives.push(name);
            }
        }
        merged
    }

    /// Stable cache key for compiled output.
    pub fn fingerprint<H: Hasher>(&self, state: &mut H) {
        self.parser.fingerprint(state);
        self.key_codes.hash(state);
        self.warn_unkeyed_component_loops.hash(state);
        self.directives.hash(state);
    }
}

const BASIC_ENTITIES: [(&str, &str); 5] = [
    ("gt", ">"),
    ("lt", "<"),
    ("amp", "&"),
    ("apos", "'"),
    ("quot", "\""),
];

const HTML_ENTITIES: [(&str, &str); 6] = [
    ("nbsp", "\u{a0}"),
    ("copy", "\u{a9}"),
    ("reg", "\u{ae}"),
    ("hellip", "\u{2026}"),
    ("mdash", "\u{2014}"),
    ("ndash", "\u{2013}"),
];

/// Decode `&gt; &lt; &amp; &apos; &quot;`.
pub fn decode_basic_entities(raw: &str) -> String {
    decode_with(raw, |name| {
        BASIC_ENTITIES
            .iter()
            .find(|(entity, _)| *entity == name)
            .map(|(_, text)| text.to_string())
    })
}

/// Basic entities, a handful of common named ones and numeric references.
pub fn decode_html_entities(raw: &str) -> String {
    decode_with(raw, |name| {
        if let Some(num) = name.strip_prefix('#') {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse().ok(),
            };
            return code.and_then(char::from_u32).map(String::from);
        }
        BASIC_ENTITIES
            .iter()
            .chain(HTML_ENTITIES.iter())
            .find(|(entity, _)| *entity == name)
            .map(|(_, text)| text.to_string())
    })
}

fn decode_with(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let decoded = tail
            .find(';')
            .filter(|&end| end > 0 && end <= 32)
            .and_then(|end| lookup(&tail[..end]).map(|text| (text, end)));
        match decoded {
            Some((text, end)) => {
                out.push_str(&text);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

fn html_namespace(tag: &str, parent: Option<(&str, Namespace)>) -> Namespace {
    match parent {
        Some((parent_tag, Namespace::Svg)) if parent_tag == "foreignObject" => Namespace::Html,
        Some((_, Namespace::Svg)) => Namespace::Svg,
        Some((parent_tag, Namespace::MathMl)) if parent_tag == "annotation-xml" && tag == "svg" => {
            Namespace::Svg
        }
        Some((_, Namespace::MathMl)) => Namespace::MathMl,
        _ => match tag {
            "svg" => Namespace::Svg,
            "math" => Namespace::MathMl,
            _ => Namespace::Html,
        },
    }
}

pub fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta"
            | "param" | "source" | "track" | "wbr"
    )
}

pub fn is_html_tag(tag: &str) -> bool {
    matches!(
        tag,
        "html" | "body" | "base" | "head" | "link" | "meta" | "style" | "title" | "address"
            | "article" | "aside" | "footer" | "header" | "h1" | "h2" | "h3" | "h4" | "h5"
            | "h6" | "hgroup" | "nav" | "section" | "div" | "dd" | "dl" | "dt" | "figcaption"
            | "figure" | "picture" | "hr" | "img" | "li" | "main" | "ol" | "p" | "pre" | "ul"
            | "a" | "b" | "abbr" | "bdi" | "bdo" | "br" | "cite" | "code" | "data" | "dfn"
            | "em" | "i" | "kbd" | "mark" | "q" | "rp" | "rt" | "rtc" | "ruby" | "s" | "samp"
            | "small" | "span" | "strong" | "sub" | "sup" | "time" | "u" | "var" | "wbr"
            | "area" | "audio" | "map" | "track" | "video" | "embed" | "object" | "param"
            | "source" | "canvas" | "script" | "noscript" | "del" | "ins" | "caption" | "col"
            | "colgroup" | "table" | "thead" | "tbody" | "td" | "th" | "tr" | "button"
            | "datalist" | "fieldset" | "form" | "input" | "label" | "legend" | "meter"
            | "optgroup" | "option" | "output" | "progress" | "select" | "textarea"
            | "details" | "dialog" | "menu" | "menuitem" | "summary" | "content" | "element"
            | "shadow" | "template" | "blockquote" | "iframe" | "tfoot"
    )
}

pub fn is_svg_tag(tag: &str) -> bool {
    matches!(
        tag,
        "svg" | "animate" | "circle" | "clipPath" | "cursor" | "defs" | "desc" | "ellipse"
            | "filter" | "font-face" | "foreignObject" | "g" | "glyph" | "image" | "line"
            | "marker" | "mask" | "missing-glyph" | "path" | "pattern" | "polygon"
            | "polyline" | "rect" | "switch" | "symbol" | "text" | "textPath" | "tspan"
            | "use" | "view"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_entities_decode() {
        assert_eq!(decode_basic_entities("a &lt; b &amp;&amp; c"), "a < b && c");
        assert_eq!(decode_basic_entities("&nbsp;&unknown;"), "&nbsp;&unknown;");
        assert_eq!(decode_basic_entities("trailing &"), "trailing &");
    }

    #[test]
    fn html_entities_include_numeric_references() {
        assert_eq!(decode_html_entities("&#65;&#x42;&nbsp;"), "AB\u{a0}");
    }

    #[test]
    fn svg_children_inherit_namespace() {
        assert_eq!(html_namespace("svg", None), Namespace::Svg);
        assert_eq!(html_namespace("circle", Some(("svg", Namespace::Svg))), Namespace::Svg);
        assert_eq!(
            html_namespace("div", Some(("foreignObject", Namespace::Svg))),
            Namespace::Html
        );
    }

    #[test]
    fn merge_overrides_scalars_and_concatenates_lists() {
        let mut base = CompilerOptions::default();
        base.key_codes.insert("f1".into(), vec![112]);
        base.directives.push("focus".into());

        let mut overrides = CompilerOverrides {
            delimiters: Some(("[[".into(), "]]".into())),
            warn_unkeyed_component_loops: Some(false),
            directives: vec!["focus".into(), "tooltip".into()],
            ..CompilerOverrides::default()
        };
        overrides.key_codes.insert("f1".into(), vec![113]);
        overrides.key_codes.insert("f2".into(), vec![114]);

        let merged = CompilerOptions::merge(&base, overrides);
        assert_eq!(merged.parser.delimiters.0, "[[");
        assert!(!merged.warn_unkeyed_component_loops);
        assert_eq!(merged.key_codes["f1"], vec![113]);
        assert_eq!(merged.key_codes["f2"], vec![114]);
        assert_eq!(merged.directives, vec!["focus".to_string(), "tooltip".to_string()]);
        assert!(merged.parser.is_native_tag.is_some());
    }
}

//! Template parser.
//!
//! A single forward pass over the source with a cursor that tracks line,
//! column and byte offset. Malformed markup is reported through the
//! options' diagnostic sink and parsing carries on.

use std::collections::HashSet;

use smallvec::SmallVec;

use super::ast::{
    Ast, Attribute, Directive, DirectiveArg, DirectiveExp, ElementNode, ElementType, Namespace,
    NodeId, NodeKind, Position, Prop, SourceLocation,
};
use super::errors::{report, CompileError, ErrorCode};
use super::options::{ParserOptions, Whitespace};

/// Parse `source` into an AST.
pub fn parse(source: &str, options: &ParserOptions) -> Ast {
    let mut parser = Parser::new(source, options);
    let mut ancestors = Vec::new();
    let children = parser.parse_children(TextMode::Data, &mut ancestors);
    let mut ast = parser.ast;
    ast.set_children(NodeId::ROOT, children);
    ast
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMode {
    /// Markup, interpolations and entities.
    Data,
    /// Interpolations and entities, ends at the parent's end tag.
    RcData,
    /// Verbatim until the parent's end tag.
    RawText,
    /// Foreign-content CDATA section.
    CData,
    AttributeValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Start,
    End,
}

#[derive(Debug, Clone)]
struct Ancestor {
    tag: String,
    ns: Namespace,
}

struct ParsedTag {
    tag: String,
    ns: Namespace,
    props: Vec<Prop>,
    is_self_closing: bool,
    tag_type: ElementType,
    start: Position,
}

struct AttributeValue {
    content: String,
    quoted: bool,
    loc: SourceLocation,
}

struct Parser<'a> {
    options: &'a ParserOptions,
    source: &'a str,
    pos: Position,
    in_pre: bool,
    in_v_pre: bool,
    /// Suppresses diagnostics while attributes are re-read for `v-pre`.
    muted: bool,
    ast: Ast,
}

fn is_space(c: char) -> bool {
    matches!(c, '\t' | '\r' | '\n' | '\x0C' | ' ')
}

fn is_whitespace_only(text: &str) -> bool {
    text.chars().all(is_space)
}

/// Collapse every whitespace run to one space.
fn condense(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if is_space(c) {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// `</tag` followed by a tag-name terminator, compared case-insensitively.
fn starts_with_end_tag_open(source: &str, tag: &str) -> bool {
    let Some(rest) = source.strip_prefix("</") else {
        return false;
    };
    let Some(name) = rest.get(..tag.len()) else {
        return false;
    };
    name.eq_ignore_ascii_case(tag)
        && rest[tag.len()..]
            .chars()
            .next()
            .map_or(true, |c| is_space(c) || c == '/' || c == '>')
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, options: &'a ParserOptions) -> Self {
        Self {
            options,
            source,
            pos: Position::default(),
            in_pre: false,
            in_v_pre: false,
            muted: false,
            ast: Ast::new(source),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos.offset..]
    }

    fn advance_by(&mut self, bytes: usize) {
        let consumed = &self.source[self.pos.offset..self.pos.offset + bytes];
        self.pos = self.pos.advanced(consumed);
    }

    fn advance_spaces(&mut self) {
        let rest = self.rest();
        let len = rest.len() - rest.trim_start_matches(is_space).len();
        if len > 0 {
            self.advance_by(len);
        }
    }

    fn selection(&self, start: Position) -> SourceLocation {
        self.selection_between(start, self.pos)
    }

    fn selection_between(&self, start: Position, end: Position) -> SourceLocation {
        SourceLocation {
            start,
            end,
            source: self.source[start.offset..end.offset].to_string(),
        }
    }

    fn error_at(&self, code: ErrorCode, pos: Position) {
        if self.muted {
            return;
        }
        report(self.options.on_error.as_ref(), CompileError::at(code, pos));
    }

    fn error(&self, code: ErrorCode) {
        self.error_at(code, self.pos);
    }

    /// Report at `offset` bytes past the cursor on the current line.
    fn error_offset(&self, code: ErrorCode, offset: usize) {
        let mut pos = self.pos;
        pos.offset += offset;
        pos.column += offset;
        self.error_at(code, pos);
    }

    fn is_end(&self, mode: TextMode, ancestors: &[Ancestor]) -> bool {
        let rest = self.rest();
        match mode {
            TextMode::Data => {
                if rest.starts_with("</")
                    && ancestors
                        .iter()
                        .rev()
                        .any(|a| starts_with_end_tag_open(rest, &a.tag))
                {
                    return true;
                }
            }
            TextMode::RcData | TextMode::RawText => {
                if let Some(parent) = ancestors.last() {
                    if starts_with_end_tag_open(rest, &parent.tag) {
                        return true;
                    }
                }
            }
            TextMode::CData => {
                if rest.starts_with("]]>") {
                    return true;
                }
            }
            TextMode::AttributeValue => {}
        }
        rest.is_empty()
    }

    fn parse_children(&mut self, mode: TextMode, ancestors: &mut Vec<Ancestor>) -> Vec<NodeId> {
        let ns = ancestors.last().map(|a| a.ns).unwrap_or_default();
        let mut nodes: Vec<NodeId> = Vec::new();

        while !self.is_end(mode, ancestors) {
            let rest = self.rest();
            let mut parsed: Option<NodeId> = None;

            if matches!(mode, TextMode::Data | TextMode::RcData) {
                if !self.in_v_pre && rest.starts_with(self.options.delimiters.0.as_str()) {
                    parsed = self.parse_interpolation(mode);
                } else if mode == TextMode::Data && rest.starts_with('<') {
                    let bytes = rest.as_bytes();
                    match bytes.get(1).copied() {
                        None => self.error_offset(ErrorCode::EofBeforeTagName, 1),
                        Some(b'!') => {
                            if rest.starts_with("<!--") {
                                parsed = Some(self.parse_comment());
                            } else if rest.starts_with("<!DOCTYPE") {
                                parsed = Some(self.parse_bogus_comment());
                            } else if rest.starts_with("<![CDATA[") {
                                if ns != Namespace::Html {
                                    for id in self.parse_cdata(ancestors) {
                                        self.push_node(&mut nodes, id);
                                    }
                                    continue;
                                }
                                self.error(ErrorCode::CdataInHtmlContent);
                                parsed = Some(self.parse_bogus_comment());
                            } else {
                                self.error(ErrorCode::IncorrectlyOpenedComment);
                                parsed = Some(self.parse_bogus_comment());
                            }
                        }
                        Some(b'/') => match bytes.get(2).copied() {
                            None => self.error_offset(ErrorCode::EofBeforeTagName, 2),
                            Some(b'>') => {
                                self.error_offset(ErrorCode::MissingEndTagName, 2);
                                self.advance_by(3);
                                continue;
                            }
                            Some(c) if c.is_ascii_alphabetic() => {
                                self.error(ErrorCode::InvalidEndTag);
                                let parent = ancestors.last().cloned();
                                self.parse_tag(TagKind::End, parent.as_ref());
                                continue;
                            }
                            Some(_) => {
                                self.error_offset(ErrorCode::InvalidFirstCharacterOfTagName, 2);
                                parsed = Some(self.parse_bogus_comment());
                            }
                        },
                        Some(c) if c.is_ascii_alphabetic() => {
                            parsed = Some(self.parse_element(ancestors));
                        }
                        Some(b'?') => {
                            self.error_offset(ErrorCode::UnexpectedQuestionMarkInsteadOfTagName, 1);
                            parsed = Some(self.parse_bogus_comment());
                        }
                        Some(_) => self.error_offset(ErrorCode::InvalidFirstCharacterOfTagName, 1),
                    }
                }
            }

            let id = match parsed {
                Some(id) => id,
                None => self.parse_text(mode),
            };
            self.push_node(&mut nodes, id);
        }

        if mode == TextMode::RawText {
            return nodes;
        }
        self.settle_whitespace(nodes, ancestors.last())
    }

    /// Drop insignificant whitespace and comments, collapse the rest.
    fn settle_whitespace(&mut self, nodes: Vec<NodeId>, parent: Option<&Ancestor>) -> Vec<NodeId> {
        let keep_comments = self.options.comments;

        if self.in_pre {
            if let Some(parent) = parent {
                if (self.options.is_pre_tag)(&parent.tag) {
                    if let Some(&first) = nodes.first() {
                        if let NodeKind::Text(text) = &mut self.ast.node_mut(first).kind {
                            if let Some(stripped) =
                                text.strip_prefix("\r\n").or_else(|| text.strip_prefix('\n'))
                            {
                                *text = stripped.to_string();
                            }
                        }
                    }
                }
            }
            return nodes
                .into_iter()
                .filter(|&id| keep_comments || !matches!(self.ast.kind(id), NodeKind::Comment(_)))
                .collect();
        }

        let mut slots: Vec<Option<NodeId>> = nodes.into_iter().map(Some).collect();
        for i in 0..slots.len() {
            let Some(id) = slots[i] else { continue };
            match self.ast.kind(id) {
                NodeKind::Comment(_) if !keep_comments => slots[i] = None,
                NodeKind::Text(text) if self.options.whitespace == Whitespace::Condense => {
                    if is_whitespace_only(text) {
                        let has_newline = text.contains(['\r', '\n']);
                        let prev = i.checked_sub(1).and_then(|p| slots[p]);
                        let next = slots.get(i + 1).copied().flatten();
                        let drop = match (prev, next) {
                            (Some(prev), Some(next)) => {
                                let is_comment =
                                    |id| matches!(self.ast.kind(id), NodeKind::Comment(_));
                                let is_element =
                                    |id| matches!(self.ast.kind(id), NodeKind::Element(_));
                                is_comment(prev)
                                    || is_comment(next)
                                    || (is_element(prev) && is_element(next) && has_newline)
                            }
                            _ => true,
                        };
                        if drop {
                            slots[i] = None;
                        } else {
                            self.ast.node_mut(id).kind = NodeKind::Text(" ".to_string());
                        }
                    } else {
                        let collapsed = condense(text);
                        self.ast.node_mut(id).kind = NodeKind::Text(collapsed);
                    }
                }
                _ => {}
            }
        }
        slots.into_iter().flatten().collect()
    }

    /// Append, merging with a directly adjacent text node.
    fn push_node(&mut self, nodes: &mut Vec<NodeId>, id: NodeId) {
        if let NodeKind::Text(content) = self.ast.kind(id) {
            if let Some(&prev) = nodes.last() {
                let adjacent = self.ast.node(prev).loc.end.offset == self.ast.node(id).loc.start.offset;
                if adjacent {
                    let content = content.clone();
                    let loc = self.ast.node(id).loc.clone();
                    let prev_node = self.ast.node_mut(prev);
                    if let NodeKind::Text(prev_content) = &mut prev_node.kind {
                        prev_content.push_str(&content);
                        prev_node.loc.end = loc.end;
                        prev_node.loc.source.push_str(&loc.source);
                        return;
                    }
                }
            }
        }
        nodes.push(id);
    }

    fn parse_cdata(&mut self, ancestors: &mut Vec<Ancestor>) -> Vec<NodeId> {
        self.advance_by("<![CDATA[".len());
        let nodes = self.parse_children(TextMode::CData, ancestors);
        if self.rest().is_empty() {
            self.error(ErrorCode::EofInCdata);
        } else {
            self.advance_by(3);
        }
        nodes
    }

    fn parse_comment(&mut self) -> NodeId {
        let start = self.pos;
        let rest = self.rest();

        let mut close = None;
        let mut from = 0;
        while let Some(found) = rest[from..].find("--") {
            let i = from + found;
            let after = &rest[i + 2..];
            if after.starts_with('>') {
                close = Some((i, 3, false));
                break;
            }
            if after.starts_with("!>") {
                close = Some((i, 4, true));
                break;
            }
            from = i + 1;
        }

        let content = match close {
            None => {
                let content = rest.get(4..).unwrap_or_default().to_string();
                self.advance_by(rest.len());
                self.error(ErrorCode::EofInComment);
                content
            }
            Some((index, close_len, bang)) => {
                if index <= 3 {
                    self.error(ErrorCode::AbruptClosingOfEmptyComment);
                }
                if bang {
                    self.error(ErrorCode::IncorrectlyClosedComment);
                }
                let content = rest.get(4..index).unwrap_or_default().to_string();
                let body = &rest[..index];
                for (nested, _) in body.match_indices("<!--").filter(|(i, _)| *i >= 1) {
                    if nested + 4 < body.len() {
                        let pos = start.advanced(&body[..nested + 1]);
                        self.error_at(ErrorCode::NestedComment, pos);
                    }
                }
                self.advance_by(index + close_len);
                content
            }
        };

        let loc = self.selection(start);
        self.ast.alloc(NodeKind::Comment(content), loc, None)
    }

    /// `<!DOCTYPE ...>`, `<?...>` and other unparseable openings.
    fn parse_bogus_comment(&mut self) -> NodeId {
        let start = self.pos;
        let rest = self.rest();
        let content_start = if rest.as_bytes().get(1) == Some(&b'?') { 1 } else { 2 };
        let content = match rest.find('>') {
            Some(close) => {
                let content = rest.get(content_start..close).unwrap_or_default().to_string();
                self.advance_by(close + 1);
                content
            }
            None => {
                let content = rest.get(content_start..).unwrap_or_default().to_string();
                self.advance_by(rest.len());
                content
            }
        };
        let loc = self.selection(start);
        self.ast.alloc(NodeKind::Comment(content), loc, None)
    }

    fn parse_element(&mut self, ancestors: &mut Vec<Ancestor>) -> NodeId {
        let was_in_pre = self.in_pre;
        let was_in_v_pre = self.in_v_pre;
        let parent = ancestors.last().cloned();

        let start_tag = self.parse_tag(TagKind::Start, parent.as_ref());
        let is_pre_boundary = self.in_pre && !was_in_pre;
        let is_v_pre_boundary = self.in_v_pre && !was_in_v_pre;

        let tag = start_tag.tag.clone();
        let ns = start_tag.ns;
        let element = ElementNode {
            tag: start_tag.tag,
            tag_type: start_tag.tag_type,
            ns,
            props: start_tag.props,
            is_self_closing: start_tag.is_self_closing,
            pre: self.in_v_pre,
            hints: Default::default(),
        };
        let loc = self.selection(start_tag.start);
        let id = self.ast.alloc(NodeKind::Element(element), loc, None);

        if start_tag.is_self_closing || (self.options.is_void_tag)(&tag) {
            if is_pre_boundary {
                self.in_pre = false;
            }
            if is_v_pre_boundary {
                self.in_v_pre = false;
            }
            return id;
        }

        ancestors.push(Ancestor {
            tag: tag.clone(),
            ns,
        });
        let mode = self.text_mode(&tag, ns);
        let children = self.parse_children(mode, ancestors);
        ancestors.pop();
        self.ast.set_children(id, children);

        if starts_with_end_tag_open(self.rest(), &tag) {
            self.parse_tag(TagKind::End, parent.as_ref());
        } else {
            self.error_at(ErrorCode::MissingEndTag, start_tag.start);
            if self.rest().is_empty() && tag.eq_ignore_ascii_case("script") {
                let first_is_comment_like = self
                    .ast
                    .children(id)
                    .first()
                    .is_some_and(|&first| self.ast.node(first).loc.source.starts_with("<!--"));
                if first_is_comment_like {
                    self.error(ErrorCode::EofInScriptHtmlCommentLikeText);
                }
            }
        }

        self.ast.node_mut(id).loc = self.selection(start_tag.start);
        if is_pre_boundary {
            self.in_pre = false;
        }
        if is_v_pre_boundary {
            self.in_v_pre = false;
        }
        id
    }

    fn text_mode(&self, tag: &str, ns: Namespace) -> TextMode {
        if ns != Namespace::Html {
            return TextMode::Data;
        }
        if (self.options.is_rcdata_tag)(tag) {
            TextMode::RcData
        } else if (self.options.is_raw_text_tag)(tag) {
            TextMode::RawText
        } else {
            TextMode::Data
        }
    }

    fn parse_tag(&mut self, kind: TagKind, parent: Option<&Ancestor>) -> ParsedTag {
        let start = self.pos;
        let rest = self.rest();
        let open_len = if kind == TagKind::End { 2 } else { 1 };
        let name_rest = &rest[open_len..];
        let name_len = name_rest
            .find(|c: char| is_space(c) || c == '/' || c == '>')
            .unwrap_or(name_rest.len());
        let tag = name_rest[..name_len].to_string();
        let ns = (self.options.get_namespace)(&tag, parent.map(|p| (p.tag.as_str(), p.ns)));

        self.advance_by(open_len + name_len);
        self.advance_spaces();

        let attrs_start = self.pos;
        let mut props = self.parse_attributes(kind);

        if (self.options.is_pre_tag)(&tag) {
            self.in_pre = true;
        }

        let has_v_pre = props
            .iter()
            .any(|p| matches!(p, Prop::Directive(dir) if dir.name == "pre"));
        if !self.in_v_pre && has_v_pre {
            self.in_v_pre = true;
            self.pos = attrs_start;
            self.muted = true;
            props = self
                .parse_attributes(kind)
                .into_iter()
                .filter(|p| !matches!(p, Prop::Attribute(attr) if attr.name == "v-pre"))
                .collect();
            self.muted = false;
        }

        let mut is_self_closing = false;
        if self.rest().is_empty() {
            self.error(ErrorCode::EofInTag);
        } else {
            is_self_closing = self.rest().starts_with("/>");
            if kind == TagKind::End && is_self_closing {
                self.error(ErrorCode::EndTagWithTrailingSolidus);
            }
            self.advance_by(if is_self_closing { 2 } else { 1 });
        }

        let tag_type = self.classify(&tag, &props);
        ParsedTag {
            tag,
            ns,
            props,
            is_self_closing,
            tag_type,
            start,
        }
    }

    /// Element, component, slot or structural template.
    fn classify(&self, tag: &str, props: &[Prop]) -> ElementType {
        if self.in_v_pre || (self.options.is_custom_element)(tag) {
            return ElementType::Element;
        }
        let has_dir = |names: &[&str]| {
            props
                .iter()
                .any(|p| matches!(p, Prop::Directive(dir) if names.contains(&dir.name.as_str())))
        };

        let mut tag_type = ElementType::Element;
        let has_v_is = has_dir(&["is"]);
        let looks_like_component = tag.starts_with(|c: char| c.is_ascii_uppercase()) || tag == "component";
        match &self.options.is_native_tag {
            Some(is_native) if !has_v_is => {
                if !is_native(tag) {
                    tag_type = ElementType::Component;
                }
            }
            _ => {
                if has_v_is || looks_like_component || tag.contains('-') {
                    tag_type = ElementType::Component;
                }
            }
        }

        if tag == "slot" {
            ElementType::Slot
        } else if tag == "template" && has_dir(&["if", "else", "else-if", "for", "slot"]) {
            ElementType::Template
        } else {
            tag_type
        }
    }

    fn parse_attributes(&mut self, kind: TagKind) -> Vec<Prop> {
        let mut props = Vec::new();
        let mut names = HashSet::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() || rest.starts_with('>') || rest.starts_with("/>") {
                break;
            }
            if rest.starts_with('/') {
                self.error(ErrorCode::UnexpectedSolidusInTag);
                self.advance_by(1);
                self.advance_spaces();
                continue;
            }
            if kind == TagKind::End {
                self.error(ErrorCode::EndTagWithAttributes);
            }

            let prop = self.parse_attribute(&mut names);
            if kind == TagKind::Start {
                props.push(prop);
            }

            if self
                .rest()
                .chars()
                .next()
                .is_some_and(|c| !is_space(c) && c != '/' && c != '>')
            {
                self.error(ErrorCode::MissingWhitespaceBetweenAttributes);
            }
            self.advance_spaces();
        }
        props
    }

    fn parse_attribute(&mut self, names: &mut HashSet<String>) -> Prop {
        let start = self.pos;
        let rest = self.rest();
        let first_len = rest.chars().next().map_or(0, char::len_utf8);
        let tail_len = rest[first_len..]
            .find(|c: char| is_space(c) || c == '/' || c == '>' || c == '=')
            .unwrap_or(rest.len() - first_len);
        let name = rest[..first_len + tail_len].to_string();

        if !names.insert(name.clone()) {
            self.error(ErrorCode::DuplicateAttribute);
        }
        if name.starts_with('=') {
            self.error(ErrorCode::UnexpectedEqualsSignBeforeAttributeName);
        }
        for (index, _) in name.match_indices(['"', '\'', '<']) {
            self.error_offset(ErrorCode::UnexpectedCharacterInAttributeName, index);
        }
        self.advance_by(name.len());

        let mut value = None;
        if self.rest().trim_start_matches(is_space).starts_with('=') {
            self.advance_spaces();
            self.advance_by(1);
            self.advance_spaces();
            value = self.parse_attribute_value();
            if value.is_none() {
                self.error(ErrorCode::MissingAttributeValue);
            }
        }
        let loc = self.selection(start);

        let is_directive = match name.strip_prefix("v-") {
            Some(after) => after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-'),
            None => [":", "@", "#"].iter().any(|p| name.starts_with(p)),
        };
        if !self.in_v_pre && is_directive {
            return Prop::Directive(self.build_directive(&name, start, value, loc));
        }

        Prop::Attribute(Attribute {
            name,
            value: value.map(|v| v.content),
            loc,
        })
    }

    /// Split `v-name:arg.mod1.mod2` (and the `:`, `@`, `#` shorthands).
    fn build_directive(
        &self,
        name: &str,
        start: Position,
        value: Option<AttributeValue>,
        loc: SourceLocation,
    ) -> Directive {
        let mut rest = name;
        let mut dir_name = None;

        if let Some(after) = name.strip_prefix("v-") {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                .unwrap_or(after.len());
            if len > 0 {
                dir_name = Some(after[..len].to_string());
                rest = &after[len..];
            }
        }

        let mut arg_raw: Option<&str> = None;
        let shorthand = dir_name.is_none() && (rest.starts_with('@') || rest.starts_with('#'));
        if rest.starts_with(':') || shorthand {
            let after = &rest[1..];
            let len = if after.starts_with('[') {
                match after.find(']') {
                    Some(close) if close > 1 => close + 1,
                    _ => after.find('.').unwrap_or(after.len()),
                }
            } else {
                after.find('.').unwrap_or(after.len())
            };
            if len > 0 {
                arg_raw = Some(&after[..len]);
                rest = &after[len..];
            }
        }

        let dir_name = dir_name.unwrap_or_else(|| {
            if name.starts_with(':') {
                "bind".to_string()
            } else if name.starts_with('@') {
                "on".to_string()
            } else {
                "slot".to_string()
            }
        });
        let modifier_text = (!rest.is_empty()).then_some(rest);

        let arg = arg_raw.map(|raw| {
            let is_slot = dir_name == "slot";
            let start_offset = name.find(raw).unwrap_or(0);
            let extra = if is_slot { modifier_text.map_or(0, str::len) } else { 0 };
            let arg_start = start.advanced(&name[..start_offset]);
            let end_offset = (start_offset + raw.len() + extra).min(name.len());
            let arg_end = start.advanced(&name[..end_offset]);

            let mut content = raw.to_string();
            let mut is_static = true;
            if content.starts_with('[') {
                is_static = false;
                if !content.ends_with(']') {
                    self.error(ErrorCode::MissingDynamicDirectiveArgumentEnd);
                    content = content[1..].to_string();
                } else {
                    content = content[1..content.len() - 1].to_string();
                }
            } else if is_slot {
                content.push_str(modifier_text.unwrap_or_default());
            }
            DirectiveArg {
                content,
                is_static,
                loc: self.selection_between(arg_start, arg_end),
            }
        });

        let modifiers: SmallVec<[String; 4]> = modifier_text
            .map(|text| {
                text.strip_prefix('.')
                    .unwrap_or(text)
                    .split('.')
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let exp = value.map(|value| {
            let mut exp_loc = value.loc;
            if value.quoted {
                let inner_start = exp_loc.start.advanced(&exp_loc.source[..1]);
                let quoted = &exp_loc.source[1..];
                let inner = quoted
                    .strip_suffix(['"', '\''])
                    .unwrap_or(quoted)
                    .to_string();
                exp_loc = SourceLocation {
                    start: inner_start,
                    end: inner_start.advanced(&inner),
                    source: inner,
                };
            }
            DirectiveExp {
                content: value.content,
                loc: exp_loc,
            }
        });

        Directive {
            name: dir_name,
            raw_name: name.to_string(),
            arg,
            exp,
            modifiers,
            loc,
        }
    }

    fn parse_attribute_value(&mut self) -> Option<AttributeValue> {
        let start = self.pos;
        let rest = self.rest();
        let quote = rest.chars().next().filter(|&c| c == '"' || c == '\'');

        let content = match quote {
            Some(quote) => {
                self.advance_by(1);
                let rest = self.rest();
                match rest.find(quote) {
                    Some(end) => {
                        let content = self.parse_text_data(end, TextMode::AttributeValue);
                        self.advance_by(1);
                        content
                    }
                    None => self.parse_text_data(rest.len(), TextMode::AttributeValue),
                }
            }
            None => {
                let len = rest
                    .find(|c: char| is_space(c) || c == '>')
                    .unwrap_or(rest.len());
                if len == 0 {
                    return None;
                }
                for (index, _) in rest[..len].match_indices(['"', '\'', '<', '=', '`']) {
                    self.error_offset(ErrorCode::UnexpectedCharacterInUnquotedAttributeValue, index);
                }
                self.parse_text_data(len, TextMode::AttributeValue)
            }
        };

        Some(AttributeValue {
            content,
            quoted: quote.is_some(),
            loc: self.selection(start),
        })
    }

    fn parse_interpolation(&mut self, mode: TextMode) -> Option<NodeId> {
        let (open, close) = (
            self.options.delimiters.0.as_str(),
            self.options.delimiters.1.as_str(),
        );
        let rest = self.rest();
        let Some(close_index) = rest[open.len()..].find(close).map(|i| i + open.len()) else {
            self.error(ErrorCode::MissingInterpolationEnd);
            return None;
        };

        let start = self.pos;
        self.advance_by(open.len());
        let raw_len = close_index - open.len();
        let content = self.parse_text_data(raw_len, mode).trim().to_string();
        self.advance_by(close.len());

        let loc = self.selection(start);
        Some(self.ast.alloc(NodeKind::Interpolation(content), loc, None))
    }

    fn parse_text(&mut self, mode: TextMode) -> NodeId {
        let rest = self.rest();
        let skip = rest.chars().next().map_or(0, char::len_utf8);
        let mut end = rest.len();
        let open = self.options.delimiters.0.as_str();
        let mut tokens = vec!["<", open];
        if mode == TextMode::CData {
            tokens.push("]]>");
        }
        for token in tokens {
            if let Some(index) = rest[skip..].find(token) {
                end = end.min(index + skip);
            }
        }

        let start = self.pos;
        let content = self.parse_text_data(end, mode);
        let loc = self.selection(start);
        self.ast.alloc(NodeKind::Text(content), loc, None)
    }

    /// Consume `len` bytes, decoding entities where the mode allows.
    fn parse_text_data(&mut self, len: usize, mode: TextMode) -> String {
        let raw = &self.rest()[..len];
        self.advance_by(len);
        if matches!(mode, TextMode::RawText | TextMode::CData) || !raw.contains('&') {
            raw.to_string()
        } else {
            (self.options.decode_entities)(raw, mode == TextMode::AttributeValue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::errors::DiagnosticSink;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn collecting() -> (ParserOptions, Arc<Mutex<Vec<ErrorCode>>>) {
        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink_codes = codes.clone();
        let sink: DiagnosticSink = Arc::new(move |err| sink_codes.lock().push(err.code));
        let options = ParserOptions {
            on_error: Some(sink),
            ..ParserOptions::html()
        };
        (options, codes)
    }

    fn only_child(ast: &Ast, id: NodeId) -> NodeId {
        let children = ast.children(id);
        assert_eq!(children.len(), 1, "expected one child, got {:?}", children);
        children[0]
    }

    #[test]
    fn parses_nested_elements_and_text() {
        let ast = parse("<div id=\"app\"><p>hi {{ name }}</p></div>", &ParserOptions::html());
        let div = only_child(&ast, NodeId::ROOT);
        let element = ast.element(div).unwrap();
        assert_eq!(element.tag, "div");
        assert_eq!(element.attribute("id").and_then(|a| a.value.as_deref()), Some("app"));

        let p = only_child(&ast, div);
        let children = ast.children(p);
        assert_eq!(ast.kind(children[0]), &NodeKind::Text("hi ".into()));
        assert_eq!(ast.kind(children[1]), &NodeKind::Interpolation("name".into()));
    }

    #[test]
    fn whitespace_between_elements_on_new_lines_is_dropped() {
        let ast = parse("<div>\n  <p>x</p>\n  <p>y</p>\n</div>", &ParserOptions::html());
        let div = only_child(&ast, NodeId::ROOT);
        let kinds: Vec<_> = ast
            .children(div)
            .iter()
            .map(|&c| matches!(ast.kind(c), NodeKind::Element(_)))
            .collect();
        assert_eq!(kinds, vec![true, true]);
    }

    #[test]
    fn inline_whitespace_collapses_to_one_space() {
        let ast = parse("<div>a  \n b</div>", &ParserOptions::html());
        let div = only_child(&ast, NodeId::ROOT);
        let text = only_child(&ast, div);
        assert_eq!(ast.kind(text), &NodeKind::Text("a b".into()));

        let ast = parse("<div><b>a</b> <i>b</i></div>", &ParserOptions::html());
        let div = only_child(&ast, NodeId::ROOT);
        assert_eq!(ast.kind(ast.children(div)[1]), &NodeKind::Text(" ".into()));
    }

    #[test]
    fn preserve_mode_keeps_text() {
        let options = ParserOptions {
            whitespace: Whitespace::Preserve,
            ..ParserOptions::html()
        };
        let ast = parse("<div>a  b</div>", &options);
        let div = only_child(&ast, NodeId::ROOT);
        assert_eq!(ast.kind(only_child(&ast, div)), &NodeKind::Text("a  b".into()));
    }

    #[test]
    fn pre_strips_leading_newline_and_keeps_spacing() {
        let ast = parse("<pre>\n  x  y</pre>", &ParserOptions::html());
        let pre = only_child(&ast, NodeId::ROOT);
        assert_eq!(ast.kind(only_child(&ast, pre)), &NodeKind::Text("  x  y".into()));
    }

    #[test]
    fn directives_are_split() {
        let ast = parse(
            "<div v-on:click.stop.prevent=\"go\" :title=\"t\" @[evt]=\"h\" #item.name></div>",
            &ParserOptions::html(),
        );
        let div = ast.element(only_child(&ast, NodeId::ROOT)).unwrap();
        let dirs: Vec<_> = div
            .props
            .iter()
            .filter_map(|p| match p {
                Prop::Directive(d) => Some(d),
                Prop::Attribute(_) => None,
            })
            .collect();

        assert_eq!(dirs[0].name, "on");
        assert_eq!(dirs[0].arg.as_ref().unwrap().content, "click");
        assert_eq!(dirs[0].modifiers.as_slice(), &["stop".to_string(), "prevent".to_string()]);
        assert_eq!(dirs[0].exp.as_ref().unwrap().content, "go");

        assert_eq!(dirs[1].name, "bind");
        assert_eq!(dirs[1].arg.as_ref().unwrap().content, "title");

        assert_eq!(dirs[2].name, "on");
        let dynamic = dirs[2].arg.as_ref().unwrap();
        assert!(!dynamic.is_static);
        assert_eq!(dynamic.content, "evt");

        assert_eq!(dirs[3].name, "slot");
        assert_eq!(dirs[3].arg.as_ref().unwrap().content, "item.name");
    }

    #[test]
    fn bare_v_prefix_is_a_plain_attribute() {
        let ast = parse("<div v-=\"x\" v-if=\"ok\"></div>", &ParserOptions::html());
        let div = ast.element(only_child(&ast, NodeId::ROOT)).unwrap();
        assert!(matches!(&div.props[0], Prop::Attribute(a) if a.name == "v-" && a.value.as_deref() == Some("x")));
        assert!(matches!(&div.props[1], Prop::Directive(d) if d.name == "if"));
    }

    #[test]
    fn classifies_components_slots_and_templates() {
        let ast = parse(
            "<MyCard></MyCard><x-widget></x-widget><slot></slot><template v-if=\"a\"></template><template></template>",
            &ParserOptions::html(),
        );
        let types: Vec<_> = ast
            .children(NodeId::ROOT)
            .iter()
            .map(|&c| ast.element(c).unwrap().tag_type)
            .collect();
        assert_eq!(
            types,
            vec![
                ElementType::Component,
                ElementType::Component,
                ElementType::Slot,
                ElementType::Template,
                ElementType::Element,
            ]
        );
    }

    #[test]
    fn v_pre_skips_directives_and_interpolation() {
        let ast = parse("<div v-pre :a=\"b\">{{ raw }}</div>", &ParserOptions::html());
        let div_id = only_child(&ast, NodeId::ROOT);
        let div = ast.element(div_id).unwrap();
        assert!(div.pre);
        assert_eq!(div.props.len(), 1);
        assert!(matches!(&div.props[0], Prop::Attribute(a) if a.name == ":a"));
        assert_eq!(ast.kind(only_child(&ast, div_id)), &NodeKind::Text("{{ raw }}".into()));
    }

    #[test]
    fn raw_text_elements_are_not_parsed() {
        let ast = parse("<script>if (a < b) {}</script>", &ParserOptions::html());
        let script = only_child(&ast, NodeId::ROOT);
        assert_eq!(
            ast.kind(only_child(&ast, script)),
            &NodeKind::Text("if (a < b) {}".into())
        );
    }

    #[test]
    fn entities_are_decoded_in_text_and_attributes() {
        let ast = parse("<a title=\"&quot;x&quot;\">&lt;b&gt;</a>", &ParserOptions::html());
        let a_id = only_child(&ast, NodeId::ROOT);
        let a = ast.element(a_id).unwrap();
        assert_eq!(a.attribute("title").and_then(|t| t.value.as_deref()), Some("\"x\""));
        assert_eq!(ast.kind(only_child(&ast, a_id)), &NodeKind::Text("<b>".into()));
    }

    #[test]
    fn reports_recoverable_errors() {
        let (options, codes) = collecting();
        let ast = parse("<div a a><p>unclosed</div>{{ open", &options);
        let codes = codes.lock().clone();
        assert!(codes.contains(&ErrorCode::DuplicateAttribute));
        assert!(codes.contains(&ErrorCode::MissingEndTag));
        assert!(codes.contains(&ErrorCode::MissingInterpolationEnd));
        assert_eq!(ast.children(NodeId::ROOT).len(), 2);
    }

    #[test]
    fn comment_diagnostics() {
        let (options, codes) = collecting();
        parse("<!--> <!-- a <!-- b --!> <!-- open", &options);
        let codes = codes.lock().clone();
        assert!(codes.contains(&ErrorCode::AbruptClosingOfEmptyComment));
        assert!(codes.contains(&ErrorCode::NestedComment));
        assert!(codes.contains(&ErrorCode::IncorrectlyClosedComment));
        assert!(codes.contains(&ErrorCode::EofInComment));
    }

    #[test]
    fn comments_are_kept_only_on_request() {
        let ast = parse("<div><!-- note --><p></p></div>", &ParserOptions::html());
        let div = only_child(&ast, NodeId::ROOT);
        assert_eq!(ast.children(div).len(), 1);

        let options = ParserOptions {
            comments: true,
            ..ParserOptions::html()
        };
        let ast = parse("<div><!-- note --><p></p></div>", &options);
        let div = only_child(&ast, NodeId::ROOT);
        assert_eq!(ast.kind(ast.children(div)[0]), &NodeKind::Comment(" note ".into()));
    }

    #[test]
    fn doctype_becomes_bogus_comment() {
        let options = ParserOptions {
            comments: true,
            ..ParserOptions::html()
        };
        let ast = parse("<!DOCTYPE html><p></p>", &options);
        assert_eq!(
            ast.kind(ast.children(NodeId::ROOT)[0]),
            &NodeKind::Comment("DOCTYPE html".into())
        );
    }

    #[test]
    fn locations_cover_source_slices() {
        let source = "<div>\n  <span>x</span>\n</div>";
        let ast = parse(source, &ParserOptions::html());
        let div = only_child(&ast, NodeId::ROOT);
        let span = only_child(&ast, div);
        let loc = &ast.node(span).loc;
        assert_eq!(loc.source, "<span>x</span>");
        assert_eq!(loc.start.line, 2);
        assert_eq!(loc.start.column, 3);
        assert_eq!(&source[loc.start.offset..loc.end.offset], loc.source);
    }

    #[test]
    fn custom_delimiters() {
        let options = ParserOptions {
            delimiters: ("[[".into(), "]]".into()),
            ..ParserOptions::html()
        };
        let ast = parse("<p>[[ a ]] {{ b }}</p>", &options);
        let p = only_child(&ast, NodeId::ROOT);
        assert_eq!(ast.kind(ast.children(p)[0]), &NodeKind::Interpolation("a".into()));
        assert_eq!(ast.kind(ast.children(p)[1]), &NodeKind::Text(" {{ b }}".into()));
    }
}

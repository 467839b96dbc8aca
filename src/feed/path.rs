use std::collections::HashMap;
use std::fmt;

use super::cursor::Element;
use super::FeedError;

/// Namespace-qualified element name, displayed in Clark notation (`{uri}local`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub namespace: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(namespace: Option<&str>, local: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            local: local.to_string(),
        }
    }

    /// Resolves a `prefix:local` (or bare `local`) name against a prefix map.
    ///
    /// A bare name has no namespace. An unknown prefix is an error.
    pub fn resolve(qualified: &str, namespaces: &HashMap<String, String>) -> Result<Self, FeedError> {
        let qualified = qualified.trim();
        match qualified.split_once(':') {
            Some((prefix, local)) => {
                let uri = namespaces
                    .get(prefix)
                    .ok_or_else(|| FeedError::UnboundPrefix(prefix.to_string()))?;
                if local.is_empty() {
                    return Err(FeedError::InvalidPath(qualified.to_string()));
                }
                Ok(Self::new(Some(uri), local))
            }
            None if qualified.is_empty() => Err(FeedError::InvalidPath(qualified.to_string())),
            None => Ok(Self::new(None, qualified)),
        }
    }

    /// Approximate heap bytes held by this name.
    pub(crate) fn footprint(&self) -> usize {
        self.local.len() + self.namespace.as_ref().map_or(0, String::len)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Matches at any depth below the current element instead of direct children only.
    descendant: bool,
    name: ExpandedName,
}

/// Restricted path expression evaluated against one closed item element.
///
/// Supports `name`, `prefix:name`, `/`-separated steps and `//` descendant
/// steps, e.g. `//zbozi:URL` or `zbozi:PARAM/zbozi:VAL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemPath {
    source: String,
    steps: Vec<Step>,
}

impl ItemPath {
    pub fn parse(expr: &str, namespaces: &HashMap<String, String>) -> Result<Self, FeedError> {
        let source = expr.trim().to_string();
        let invalid = || FeedError::InvalidPath(source.clone());

        let mut steps = Vec::new();
        let mut rest = source.as_str();
        while !rest.is_empty() {
            let descendant = if let Some(r) = rest.strip_prefix("//") {
                rest = r;
                true
            } else if let Some(r) = rest.strip_prefix('/') {
                if steps.is_empty() {
                    // A single leading slash would address the document root,
                    // which no longer exists once the item is detached.
                    return Err(invalid());
                }
                rest = r;
                false
            } else if steps.is_empty() {
                false
            } else {
                return Err(invalid());
            };

            let end = rest.find('/').unwrap_or(rest.len());
            let (name, tail) = rest.split_at(end);
            if name.is_empty() || name == "." || name == ".." {
                return Err(invalid());
            }
            steps.push(Step {
                descendant,
                name: ExpandedName::resolve(name, namespaces)?,
            });
            rest = tail;
        }

        if steps.is_empty() {
            return Err(invalid());
        }
        Ok(Self { source, steps })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the trimmed text of the first match in document order.
    ///
    /// A match whose text is blank counts as no match.
    pub fn first_text(&self, root: &Element) -> Option<String> {
        self.first_match(root)
            .map(|el| el.text().trim())
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }

    pub fn first_match<'a>(&self, root: &'a Element) -> Option<&'a Element> {
        find_first(root, &self.steps)
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn find_first<'a>(context: &'a Element, steps: &[Step]) -> Option<&'a Element> {
    let Some((step, rest)) = steps.split_first() else {
        return Some(context);
    };

    for child in &context.children {
        if child.name == step.name {
            if let Some(found) = find_first(child, rest) {
                return Some(found);
            }
        }
        if step.descendant {
            // Same step again, one level deeper.
            if let Some(found) = find_first(child, steps) {
                return Some(found);
            }
        }
    }
    None
}

/// Which elements to capture from a feed and which text to pull out of each.
#[derive(Debug, Clone)]
pub struct ItemSpec {
    pub tag: ExpandedName,
    pub path: ItemPath,
}

impl ItemSpec {
    pub fn resolve(
        tag: &str,
        path: &str,
        namespaces: &HashMap<String, String>,
    ) -> Result<Self, FeedError> {
        Ok(Self {
            tag: ExpandedName::resolve(tag, namespaces)?,
            path: ItemPath::parse(path, namespaces)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::cursor::ParseCursor;

    const NS: &str = "http://www.zbozi.cz/ns/offer/1.0";

    fn zbozi() -> HashMap<String, String> {
        HashMap::from([("zbozi".to_string(), NS.to_string())])
    }

    fn parse_item(xml: &str, tag: &ExpandedName) -> Element {
        let mut cursor = ParseCursor::new(tag.clone());
        cursor.feed(xml.as_bytes());
        let mut closed = cursor.poll_events().unwrap();
        cursor.finish().unwrap();
        assert_eq!(closed.len(), 1);
        closed.remove(0).element
    }

    #[test]
    fn test_resolve_prefixed_name() {
        let name = ExpandedName::resolve("zbozi:SHOPITEM", &zbozi()).unwrap();
        assert_eq!(name.namespace.as_deref(), Some(NS));
        assert_eq!(name.local, "SHOPITEM");
        assert_eq!(name.to_string(), format!("{{{}}}SHOPITEM", NS));
    }

    #[test]
    fn test_resolve_bare_name_has_no_namespace() {
        let name = ExpandedName::resolve("ProteinEntry", &HashMap::new()).unwrap();
        assert_eq!(name.namespace, None);
        assert_eq!(name.to_string(), "ProteinEntry");
    }

    #[test]
    fn test_resolve_unknown_prefix_fails() {
        let err = ExpandedName::resolve("g:id", &zbozi()).unwrap_err();
        assert!(matches!(err, FeedError::UnboundPrefix(p) if p == "g"));
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        for expr in ["", "/", "/zbozi:URL", "zbozi:URL/", "a//", "..", "zbozi:"] {
            assert!(ItemPath::parse(expr, &zbozi()).is_err(), "accepted {:?}", expr);
        }
    }

    #[test]
    fn test_descendant_path_finds_nested_field() {
        let tag = ExpandedName::resolve("zbozi:SHOPITEM", &zbozi()).unwrap();
        let item = parse_item(
            r#"<SHOPITEM xmlns="http://www.zbozi.cz/ns/offer/1.0">
                <LINKS><URL> https://shop.example/a </URL></LINKS>
                <URL>https://shop.example/b</URL>
            </SHOPITEM>"#,
            &tag,
        );

        let path = ItemPath::parse("//zbozi:URL", &zbozi()).unwrap();
        assert_eq!(path.first_text(&item).as_deref(), Some("https://shop.example/a"));

        let direct = ItemPath::parse("zbozi:URL", &zbozi()).unwrap();
        assert_eq!(direct.first_text(&item).as_deref(), Some("https://shop.example/b"));

        let nested = ItemPath::parse("zbozi:LINKS/zbozi:URL", &zbozi()).unwrap();
        assert_eq!(nested.first_text(&item).as_deref(), Some("https://shop.example/a"));
    }

    #[test]
    fn test_path_respects_namespace() {
        let tag = ExpandedName::resolve("zbozi:SHOPITEM", &zbozi()).unwrap();
        let item = parse_item(
            r#"<z:SHOPITEM xmlns:z="http://www.zbozi.cz/ns/offer/1.0"><URL>plain</URL></z:SHOPITEM>"#,
            &tag,
        );
        let path = ItemPath::parse("//zbozi:URL", &zbozi()).unwrap();
        assert_eq!(path.first_text(&item), None);

        let unqualified = ItemPath::parse("URL", &zbozi()).unwrap();
        assert_eq!(unqualified.first_text(&item).as_deref(), Some("plain"));
    }

    #[test]
    fn test_blank_field_is_no_match() {
        let tag = ExpandedName::resolve("zbozi:SHOPITEM", &zbozi()).unwrap();
        let path = ItemPath::parse("//zbozi:URL", &zbozi()).unwrap();
        for doc in [
            r#"<SHOPITEM xmlns="http://www.zbozi.cz/ns/offer/1.0"><URL></URL></SHOPITEM>"#,
            r#"<SHOPITEM xmlns="http://www.zbozi.cz/ns/offer/1.0"><URL/></SHOPITEM>"#,
            r#"<SHOPITEM xmlns="http://www.zbozi.cz/ns/offer/1.0"><URL>
            </URL></SHOPITEM>"#,
        ] {
            let item = parse_item(doc, &tag);
            assert!(path.first_match(&item).is_some());
            assert_eq!(path.first_text(&item), None, "{}", doc);
        }
    }
}

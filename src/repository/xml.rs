// src/repository/xml.rs

//! Parsing of repository XML documents
//!
//! A repository document has a `root` element with an optional
//! `<spec-version>`, followed by `<license>`, `<package>` and `<version>`
//! elements in any order. The core reads only the fields it needs from a
//! `<version>` element and keeps the element text verbatim for storage, so
//! unknown child elements survive a round trip through the catalogue.

use crate::error::{Error, Result};
use crate::model::{validate_icon_url, Dependency, DetectFile, License, Package, PackageVersion};
use crate::version::Version;
use tracing::warn;

/// Everything read from one repository document
#[derive(Debug, Default)]
pub struct ParsedRepository {
    pub spec_version: Option<Version>,
    pub licenses: Vec<License>,
    pub packages: Vec<Package>,
    pub versions: Vec<PackageVersion>,
}

/// Highest repository specification version this build understands
const MAX_SPEC_VERSION: [u32; 2] = [4, 0];

fn xml_error(e: &roxmltree::Error) -> Error {
    let pos = e.pos();
    Error::XmlParse {
        line: pos.row,
        column: pos.col,
        message: e.to_string(),
    }
}

fn child_text<'a>(node: roxmltree::Node<'a, 'a>, name: &str) -> Option<String> {
    node.children()
        .find(|c| c.is_element() && c.has_tag_name(name))
        .and_then(|c| c.text())
        .map(|t| t.trim().to_string())
}

/// Parse a full repository document
///
/// Fails on malformed XML, an unreadable `<spec-version>`, an incompatible
/// specification version, or an invalid `<package>`/`<version>` entry.
pub fn parse_repository(text: &str) -> Result<ParsedRepository> {
    let doc = roxmltree::Document::parse(text).map_err(|e| xml_error(&e))?;
    let root = doc.root_element();

    let mut parsed = ParsedRepository::default();

    if let Some(spec) = child_text(root, "spec-version") {
        let v = Version::parse(&spec)
            .map_err(|_| Error::IncompatibleRepository(spec.clone()))?;
        if v.compare(&Version::from_parts(&MAX_SPEC_VERSION)) != std::cmp::Ordering::Less {
            return Err(Error::IncompatibleRepository(spec));
        }
        parsed.spec_version = Some(v);
    }

    for node in root.children().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            "license" => parsed.licenses.push(parse_license(node)?),
            "package" => parsed.packages.push(parse_package(node)?),
            "version" => parsed.versions.push(parse_version(text, node)?),
            "spec-version" => {}
            other => warn!("Ignoring unknown repository element <{}>", other),
        }
    }

    Ok(parsed)
}

fn parse_license(node: roxmltree::Node) -> Result<License> {
    let name = node
        .attribute("name")
        .ok_or_else(|| Error::Internal("<license> without a name".to_string()))?;
    let mut license = License::new(name, child_text(node, "title").unwrap_or_default());
    license.description = child_text(node, "description").unwrap_or_default();
    license.url = child_text(node, "url").unwrap_or_default();
    Ok(license)
}

fn parse_package(node: roxmltree::Node) -> Result<Package> {
    let name = node
        .attribute("name")
        .ok_or_else(|| Error::Internal("<package> without a name".to_string()))?;
    if !Package::is_valid_name(name) {
        return Err(Error::InvalidPackageName(name.to_string()));
    }

    let mut package = Package::new(name, child_text(node, "title").unwrap_or_default());
    package.url = child_text(node, "url").unwrap_or_default();
    package.description = child_text(node, "description").unwrap_or_default();
    package.license = child_text(node, "license").unwrap_or_default();

    if let Some(icon) = child_text(node, "icon") {
        validate_icon_url(&icon)?;
        package.icon = icon;
    }

    for category in node
        .children()
        .filter(|c| c.is_element() && c.has_tag_name("category"))
    {
        if let Some(text) = category.text() {
            package.categories.push(text.trim().to_string());
        }
    }

    Ok(package)
}

fn parse_version(text: &str, node: roxmltree::Node) -> Result<PackageVersion> {
    let package = node
        .attribute("package")
        .ok_or_else(|| Error::Internal("<version> without a package".to_string()))?;
    if !Package::is_valid_name(package) {
        return Err(Error::InvalidPackageName(package.to_string()));
    }
    let version_str = node
        .attribute("name")
        .ok_or_else(|| Error::Internal("<version> without a name".to_string()))?;
    let version = Version::parse(version_str)?;

    let mut pv = PackageVersion::new(package, version);
    pv.download = child_text(node, "url");
    pv.sha1 = child_text(node, "sha1");
    pv.important = node.attribute("important") == Some("true");

    if let Some(guid) = child_text(node, "detect-msi") {
        if guid.len() != 38 {
            return Err(Error::Internal(format!(
                "Invalid MSI GUID for {} {}: {}",
                package, version_str, guid
            )));
        }
        pv.msi_guid = Some(guid.to_uppercase());
    }

    for dep in node
        .children()
        .filter(|c| c.is_element() && c.has_tag_name("dependency"))
    {
        let dep_package = dep
            .attribute("package")
            .ok_or_else(|| Error::Internal("<dependency> without a package".to_string()))?;
        let versions = dep.attribute("versions").unwrap_or("[0, 999999)");
        pv.dependencies
            .push(Dependency::parse_versions(dep_package, versions)?);
    }

    for df in node
        .children()
        .filter(|c| c.is_element() && c.has_tag_name("detect-file"))
    {
        let path = child_text(df, "path")
            .ok_or_else(|| Error::Internal("<detect-file> without a path".to_string()))?;
        let sha1 = child_text(df, "sha1")
            .ok_or_else(|| Error::Internal("<detect-file> without a sha1".to_string()))?;
        pv.detect_files.push(DetectFile {
            path,
            sha1: sha1.to_lowercase(),
        });
    }

    pv.source_xml = Some(text[node.range()].to_string());

    Ok(pv)
}

/// Parse a stored CONTENT blob (one `<version>` document)
pub fn parse_version_document(text: &str) -> Result<PackageVersion> {
    let doc = roxmltree::Document::parse(text).map_err(|e| xml_error(&e))?;
    let root = doc.root_element();
    if !root.has_tag_name("version") {
        return Err(Error::Internal(format!(
            "Expected a <version> document, found <{}>",
            root.tag_name().name()
        )));
    }
    parse_version(text, root)
}

/// Serialize a package version created outside a repository document
/// (detected installations) into the stored XML form
pub fn version_to_xml(pv: &PackageVersion) -> String {
    use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);

    let mut version = BytesStart::new("version");
    version.push_attribute(("name", pv.version.to_string().as_str()));
    version.push_attribute(("package", pv.package.as_str()));
    if pv.important {
        version.push_attribute(("important", "true"));
    }
    writer.write_event(Event::Start(version)).unwrap();

    let mut text_tag = |name: &str, value: &str| {
        writer.write_event(Event::Start(BytesStart::new(name))).unwrap();
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .unwrap();
        writer.write_event(Event::End(BytesEnd::new(name))).unwrap();
    };

    if let Some(url) = &pv.download {
        text_tag("url", url);
    }
    if let Some(sha1) = &pv.sha1 {
        text_tag("sha1", sha1);
    }
    if let Some(guid) = &pv.msi_guid {
        text_tag("detect-msi", guid);
    }

    for dep in &pv.dependencies {
        let mut e = BytesStart::new("dependency");
        e.push_attribute(("package", dep.package.as_str()));
        e.push_attribute((
            "versions",
            format!("[{}, {})", dep.min, dep.max).as_str(),
        ));
        writer.write_event(Event::Empty(e)).unwrap();
    }

    for df in &pv.detect_files {
        writer
            .write_event(Event::Start(BytesStart::new("detect-file")))
            .unwrap();
        writer.write_event(Event::Start(BytesStart::new("path"))).unwrap();
        writer
            .write_event(Event::Text(BytesText::new(&df.path)))
            .unwrap();
        writer.write_event(Event::End(BytesEnd::new("path"))).unwrap();
        writer.write_event(Event::Start(BytesStart::new("sha1"))).unwrap();
        writer
            .write_event(Event::Text(BytesText::new(&df.sha1)))
            .unwrap();
        writer.write_event(Event::End(BytesEnd::new("sha1"))).unwrap();
        writer
            .write_event(Event::End(BytesEnd::new("detect-file")))
            .unwrap();
    }

    writer
        .write_event(Event::End(BytesEnd::new("version")))
        .unwrap();

    String::from_utf8(writer.into_inner()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = r#"<root>
    <spec-version>3.5</spec-version>
    <license name="gpl3">
        <title>GPLv3</title>
        <url>https://www.gnu.org/licenses/gpl-3.0.html</url>
    </license>
    <package name="a.b.Foo">
        <title>Foo</title>
        <description>A tool</description>
        <url>https://example.com/foo</url>
        <license>gpl3</license>
        <category>Tools|Editors</category>
    </package>
    <version name="1.0" package="a.b.Foo">
        <url>https://example.com/foo-1.0.zip</url>
        <sha1>da39a3ee5e6b4b0d3255bfef95601890afd80709</sha1>
        <dependency package="a.b.Bar" versions="[2, 3)"/>
        <detect-file>
            <path>bin\foo.exe</path>
            <sha1>DA39A3EE5E6B4B0D3255BFEF95601890AFD80709</sha1>
        </detect-file>
    </version>
</root>"#;

    #[test]
    fn test_parse_full_document() {
        let parsed = parse_repository(REPO).unwrap();
        assert_eq!(parsed.spec_version, Some(Version::parse("3.5").unwrap()));
        assert_eq!(parsed.licenses.len(), 1);
        assert_eq!(parsed.packages.len(), 1);
        assert_eq!(parsed.versions.len(), 1);

        let p = &parsed.packages[0];
        assert_eq!(p.name, "a.b.Foo");
        assert_eq!(p.categories, vec!["Tools|Editors"]);

        let pv = &parsed.versions[0];
        assert_eq!(pv.package, "a.b.Foo");
        assert_eq!(pv.dependencies.len(), 1);
        assert_eq!(pv.detect_files.len(), 1);
        assert_eq!(
            pv.detect_files[0].sha1,
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert!(pv.source_xml.as_deref().unwrap().starts_with("<version"));
    }

    #[test]
    fn test_missing_spec_version_is_accepted() {
        let parsed = parse_repository("<root><package name=\"a.b.Foo\"/></root>").unwrap();
        assert_eq!(parsed.spec_version, None);
        assert_eq!(parsed.packages.len(), 1);
    }

    #[test]
    fn test_spec_version_4_is_rejected() {
        let err =
            parse_repository("<root><spec-version>4.0</spec-version></root>").unwrap_err();
        assert!(matches!(err, Error::IncompatibleRepository(_)));
    }

    #[test]
    fn test_malformed_xml_reports_position() {
        let err = parse_repository("<root><package></root>").unwrap_err();
        match err {
            Error::XmlParse { line, .. } => assert!(line >= 1),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_version_round_trip_through_blob() {
        let parsed = parse_repository(REPO).unwrap();
        let blob = parsed.versions[0].source_xml.clone().unwrap();
        let pv = parse_version_document(&blob).unwrap();
        assert_eq!(pv.package, "a.b.Foo");
        assert_eq!(pv.download.as_deref(), Some("https://example.com/foo-1.0.zip"));
        assert_eq!(pv.source_xml.as_deref(), Some(blob.as_str()));
    }

    #[test]
    fn test_version_to_xml_parses_back() {
        let mut pv = PackageVersion::new("a.b.Foo", Version::parse("2.1").unwrap());
        pv.download = Some("https://example.com/foo.zip".to_string());
        pv.dependencies.push(Dependency::new(
            "a.b.Bar",
            Version::parse("1").unwrap(),
            Version::parse("2").unwrap(),
        ));

        let xml = version_to_xml(&pv);
        let reparsed = parse_version_document(&xml).unwrap();
        assert_eq!(reparsed.package, "a.b.Foo");
        assert_eq!(reparsed.version, pv.version);
        assert_eq!(reparsed.dependencies, pv.dependencies);
    }

    #[test]
    fn test_invalid_msi_guid_is_rejected() {
        let doc = r#"<version name="1.0" package="a.b.Foo">
            <detect-msi>{123}</detect-msi>
        </version>"#;
        assert!(parse_version_document(doc).is_err());
    }

    #[test]
    fn test_invalid_package_name_is_rejected() {
        let doc = "<root><package name=\"has space\"/></root>";
        assert!(matches!(
            parse_repository(doc),
            Err(Error::InvalidPackageName(_))
        ));
    }
}

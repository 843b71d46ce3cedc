//! EPUB 3 archive encoder
//!
//! Output is byte-for-byte reproducible for identical requests: entries are
//! written in a fixed order with a fixed timestamp and the package identifier
//! is derived from the content itself.

mod html;
mod images;

pub use html::{ImagePolicy, escape_xml, image_sources, sanitize_html};
pub use images::{FetchedImage, ImageFetcher};

use async_trait::async_trait;
use articles2kindle_domain::{ArchiveEncoder, ArchiveRequest, Chapter, EncodeError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

pub const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

const LANGUAGE: &str = "en";

const NO_CONTENT: &str = "<p>No content available.</p>";

const STYLESHEET: &str = r#"body {
  font-family: Georgia, serif;
  line-height: 1.6;
  margin: 1em;
  color: #333;
}
h1 {
  font-size: 1.4em;
  margin-bottom: 0.5em;
}
h2 {
  font-size: 1.2em;
  margin-bottom: 0.4em;
}
p {
  margin-bottom: 0.8em;
  text-align: justify;
}
blockquote {
  margin: 1em 0;
  padding-left: 1em;
  border-left: 3px solid #ccc;
  color: #555;
}
img {
  max-width: 100%;
  height: auto;
}
pre, code {
  font-family: monospace;
  font-size: 0.9em;
  background: #f5f5f5;
  padding: 0.2em 0.4em;
}
pre {
  padding: 1em;
  overflow-x: auto;
}
a {
  color: #1a0dab;
}
.article-meta {
  font-size: 0.85em;
  color: #666;
  margin-bottom: 1.5em;
  border-bottom: 1px solid #eee;
  padding-bottom: 0.5em;
}
"#;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// An image entry inside the package
struct EmbeddedImage {
    href: String,
    image: Arc<FetchedImage>,
}

/// Encodes bundles as EPUB 3 packages
pub struct EpubEncoder {
    images: ImageFetcher,
}

impl Default for EpubEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EpubEncoder {
    pub fn new() -> Self {
        Self::with_image_fetcher(ImageFetcher::new())
    }

    pub fn with_image_fetcher(images: ImageFetcher) -> Self {
        Self { images }
    }

    /// Download every referenced image once and map it to a package path
    async fn collect_images(
        &self,
        chapters: &[Chapter],
    ) -> (HashMap<String, String>, Vec<EmbeddedImage>) {
        let mut local = HashMap::new();
        let mut embedded = Vec::new();

        for body in chapters.iter().filter_map(|c| c.body_html.as_deref()) {
            for src in image_sources(body) {
                if local.contains_key(&src) {
                    continue;
                }
                if let Some(image) = self.images.fetch(&src).await {
                    let href = format!("images/img-{:03}.{}", embedded.len() + 1, image.extension);
                    local.insert(src, href.clone());
                    embedded.push(EmbeddedImage { href, image });
                }
            }
        }

        (local, embedded)
    }
}

#[async_trait]
impl ArchiveEncoder for EpubEncoder {
    async fn encode(&self, request: &ArchiveRequest) -> Result<Vec<u8>, EncodeError> {
        let (local, embedded) = if request.with_images {
            self.collect_images(&request.chapters).await
        } else {
            (HashMap::new(), Vec::new())
        };
        let policy = if request.with_images {
            ImagePolicy::Embed(&local)
        } else {
            ImagePolicy::Strip
        };

        let chapters: Vec<String> = request
            .chapters
            .iter()
            .map(|chapter| chapter_xhtml(chapter, policy))
            .collect();

        write_package(request, &chapters, &embedded)
    }

    fn extension(&self) -> &'static str {
        "epub"
    }

    fn media_type(&self) -> &'static str {
        EPUB_MEDIA_TYPE
    }
}

fn chapter_file(index: usize) -> String {
    format!("chapter-{:03}.xhtml", index + 1)
}

fn chapter_xhtml(chapter: &Chapter, policy: ImagePolicy<'_>) -> String {
    let title = escape_xml(&chapter.title);

    let mut meta: Vec<String> = Vec::new();
    if let Some(byline) = &chapter.byline {
        meta.push(escape_xml(byline));
    }
    if let Some(url) = chapter.source_url.as_deref().filter(|u| u.starts_with("http")) {
        meta.push(format!("<a href=\"{}\">Original</a>", escape_xml(url)));
    }
    let meta = if meta.is_empty() {
        String::new()
    } else {
        format!("<div class=\"article-meta\">{}</div>\n", meta.join(" · "))
    };

    let body = match chapter.body_html.as_deref() {
        Some(html) if !html.trim().is_empty() => sanitize_html(html, policy),
        _ => NO_CONTENT.to_string(),
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
<meta charset="UTF-8"/>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
<h1>{title}</h1>
{meta}{body}
</body>
</html>
"#,
        lang = LANGUAGE,
        title = title,
        meta = meta,
        body = body,
    )
}

/// Content-derived `urn:uuid:` identifier
fn package_identifier(
    request: &ArchiveRequest,
    chapters: &[String],
    embedded: &[EmbeddedImage],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.title.as_bytes());
    hasher.update([0]);
    hasher.update(request.author.as_bytes());
    for chapter in chapters {
        hasher.update([0]);
        hasher.update(chapter.as_bytes());
    }
    for entry in embedded {
        hasher.update([0]);
        hasher.update(entry.href.as_bytes());
        hasher.update(&entry.image.bytes);
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    format!("urn:uuid:{}", Uuid::from_bytes(bytes))
}

fn modified_stamp(request: &ArchiveRequest) -> Result<String, EncodeError> {
    request
        .modified
        .to_offset(time::UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|e| EncodeError::Archive(e.to_string()))?
        .format(&Rfc3339)
        .map_err(|e| EncodeError::Archive(e.to_string()))
}

fn content_opf(
    request: &ArchiveRequest,
    identifier: &str,
    modified: &str,
    chapter_count: usize,
    embedded: &[EmbeddedImage],
) -> String {
    let mut manifest = String::new();
    manifest.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
    );
    manifest.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
    );
    manifest.push_str("    <item id=\"style\" href=\"style.css\" media-type=\"text/css\"/>\n");
    let mut spine = String::new();
    for index in 0..chapter_count {
        manifest.push_str(&format!(
            "    <item id=\"chapter-{:03}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            index + 1,
            chapter_file(index)
        ));
        spine.push_str(&format!("    <itemref idref=\"chapter-{:03}\"/>\n", index + 1));
    }
    for (index, entry) in embedded.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"img-{:03}\" href=\"{}\" media-type=\"{}\"/>\n",
            index + 1,
            entry.href,
            entry.image.media_type
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id" xml:lang="{lang}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{lang}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        lang = LANGUAGE,
        identifier = identifier,
        title = escape_xml(&request.title),
        creator = escape_xml(&request.author),
        modified = modified,
        manifest = manifest,
        spine = spine,
    )
}

fn nav_xhtml(request: &ArchiveRequest) -> String {
    let mut items = String::new();
    for (index, chapter) in request.chapters.iter().enumerate() {
        items.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            chapter_file(index),
            escape_xml(&chapter.title)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
<meta charset="UTF-8"/>
<title>{title}</title>
<link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>{title}</h1>
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
        lang = LANGUAGE,
        title = escape_xml(&request.title),
        items = items,
    )
}

fn toc_ncx(request: &ArchiveRequest, identifier: &str) -> String {
    let mut points = String::new();
    for (index, chapter) in request.chapters.iter().enumerate() {
        points.push_str(&format!(
            r#"    <navPoint id="nav-{n:03}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{src}"/>
    </navPoint>
"#,
            n = index + 1,
            label = escape_xml(&chapter.title),
            src = chapter_file(index),
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{identifier}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        identifier = identifier,
        title = escape_xml(&request.title),
        points = points,
    )
}

fn archive_error(e: zip::result::ZipError) -> EncodeError {
    EncodeError::Archive(e.to_string())
}

fn write_package(
    request: &ArchiveRequest,
    chapters: &[String],
    embedded: &[EmbeddedImage],
) -> Result<Vec<u8>, EncodeError> {
    let identifier = package_identifier(request, chapters, embedded);
    let modified = modified_stamp(request)?;

    let fixed_time = DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0)
        .map_err(|e| EncodeError::Archive(e.to_string()))?;
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(fixed_time);
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(fixed_time);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    // The mimetype entry must come first and uncompressed
    zip.start_file("mimetype", stored).map_err(archive_error)?;
    zip.write_all(EPUB_MEDIA_TYPE.as_bytes())?;

    let mut text_entries: Vec<(String, String)> = vec![
        ("META-INF/container.xml".to_string(), CONTAINER_XML.to_string()),
        (
            "OEBPS/content.opf".to_string(),
            content_opf(request, &identifier, &modified, chapters.len(), embedded),
        ),
        ("OEBPS/nav.xhtml".to_string(), nav_xhtml(request)),
        ("OEBPS/toc.ncx".to_string(), toc_ncx(request, &identifier)),
        ("OEBPS/style.css".to_string(), STYLESHEET.to_string()),
    ];
    for (index, chapter) in chapters.iter().enumerate() {
        text_entries.push((format!("OEBPS/{}", chapter_file(index)), chapter.clone()));
    }

    for (name, content) in &text_entries {
        zip.start_file(name.as_str(), deflated)
            .map_err(archive_error)?;
        zip.write_all(content.as_bytes())?;
    }

    for entry in embedded {
        zip.start_file(format!("OEBPS/{}", entry.href), stored)
            .map_err(archive_error)?;
        zip.write_all(&entry.image.bytes)?;
    }

    let cursor = zip.finish().map_err(archive_error)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use time::macros::datetime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::ZipArchive;

    fn request(with_images: bool, body: &str) -> ArchiveRequest {
        ArchiveRequest {
            title: "Money Stuff (Part 1)".to_string(),
            author: "Matt Levine".to_string(),
            chapters: vec![
                Chapter {
                    title: "Bonds & Things".to_string(),
                    byline: Some("By Matt Levine · Money Stuff · March 9, 2024".to_string()),
                    source_url: Some("https://example.com/bonds".to_string()),
                    body_html: Some(body.to_string()),
                },
                Chapter {
                    title: "Empty".to_string(),
                    byline: None,
                    source_url: None,
                    body_html: None,
                },
            ],
            with_images,
            modified: datetime!(2024-03-09 16:00:00.5 UTC),
        }
    }

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    #[tokio::test]
    async fn test_package_layout() {
        let encoder = EpubEncoder::new();
        let bytes = encoder
            .encode(&request(false, "<p>Hello<script>x</script></p>"))
            .await
            .unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);

        let opf = read_entry(&bytes, "OEBPS/content.opf");
        assert!(opf.contains("<dc:title>Money Stuff (Part 1)</dc:title>"));
        assert!(opf.contains("<dc:creator>Matt Levine</dc:creator>"));
        assert!(opf.contains("<meta property=\"dcterms:modified\">2024-03-09T16:00:00Z</meta>"));
        assert!(opf.contains("<itemref idref=\"chapter-002\"/>"));

        let chapter = read_entry(&bytes, "OEBPS/chapter-001.xhtml");
        assert!(chapter.contains("<h1>Bonds &amp; Things</h1>"));
        assert!(chapter.contains("<a href=\"https://example.com/bonds\">Original</a>"));
        assert!(chapter.contains("<p>Hello</p>"));
        assert!(!chapter.contains("script"));

        let empty = read_entry(&bytes, "OEBPS/chapter-002.xhtml");
        assert!(empty.contains("No content available."));

        let nav = read_entry(&bytes, "OEBPS/nav.xhtml");
        assert!(nav.contains("<h1>Money Stuff (Part 1)</h1>"));
    }

    #[tokio::test]
    async fn test_encoding_is_deterministic() {
        let encoder = EpubEncoder::new();
        let req = request(false, "<p>Same</p>");

        let first = encoder.encode(&req).await.unwrap();
        let second = encoder.encode(&req).await.unwrap();
        assert_eq!(first, second);

        let mut retitled = req.clone();
        retitled.title = "Money Stuff (Part 2)".to_string();
        assert_ne!(encoder.encode(&retitled).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_images_stripped_unless_requested() {
        let encoder = EpubEncoder::new();
        let bytes = encoder
            .encode(&request(
                false,
                r#"<p>Pic</p><img src="https://cdn.example.com/a.png">"#,
            ))
            .await
            .unwrap();

        let chapter = read_entry(&bytes, "OEBPS/chapter-001.xhtml");
        assert!(!chapter.contains("<img"));
    }

    #[tokio::test]
    async fn test_images_embedded_and_failures_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![137u8, 80, 78, 71]),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let body = format!(
            r#"<p>x</p><img src="{uri}/ok.png" alt="ok"><img src="{uri}/broken.png">"#,
            uri = server.uri()
        );
        let encoder = EpubEncoder::new();
        let req = request(true, &body);

        let bytes = encoder.encode(&req).await.unwrap();
        // Cached images keep re-encodes identical without new downloads
        assert_eq!(encoder.encode(&req).await.unwrap(), bytes);

        let chapter = read_entry(&bytes, "OEBPS/chapter-001.xhtml");
        assert!(chapter.contains(r#"<img src="images/img-001.png" alt="ok"/>"#));
        assert!(!chapter.contains("broken"));

        let opf = read_entry(&bytes, "OEBPS/content.opf");
        assert!(opf.contains(r#"href="images/img-001.png" media-type="image/png""#));

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let mut image = archive.by_name("OEBPS/images/img-001.png").unwrap();
        let mut image_bytes = Vec::new();
        image.read_to_end(&mut image_bytes).unwrap();
        assert_eq!(image_bytes, vec![137u8, 80, 78, 71]);
    }
}

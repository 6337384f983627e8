//! Manifest XML codec.
//!
//! The document looks like this:
//!
//! ```text
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Bundle id="..." start="2024-05-01T10:00:00Z" duration="1500">
//!     <Media>
//!         <Track id="track-1" type="track/presenter">
//!             <MimeType>video/mp4</MimeType>
//!             <Checksum type="sha256">...</Checksum>
//!             <File>tracks/track-1/video.mp4</File>
//!             <Duration>1500</Duration>
//!         </Track>
//!     </Media>
//!     <Metadata>...</Metadata>
//!     <Attachments>...</Attachments>
//!     <Unclassified>...</Unclassified>
//! </Bundle>
//! ```
//!
//! Reading is split in two: document structure errors are always fatal,
//! while each element entry is decoded on its own so the caller can decide
//! whether a broken entry aborts the load or is dropped.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::checksum::{Checksum, ChecksumType};
use crate::element::{
    is_valid_identifier, AudioSettings, DeviceInfo, Element, ElementBody, ElementKind, TrackInfo,
    VideoSettings,
};
use crate::flavor::Flavor;
use crate::mimetype::MimeType;
use crate::reference::{Reference, BUNDLE_TYPE, SELF};

const ROOT_TAG: &str = "Bundle";

/// Manifest header and undecoded element entries.
pub(crate) struct Document {
    pub identifier: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub duration: u64,
    pub entries: Vec<Entry>,
}

/// One element entry as found in the document.
pub(crate) struct Entry {
    pub kind: ElementKind,
    pub id: Option<String>,
    node: Node,
}

impl Entry {
    /// Decode the entry, resolving its file against `root`.
    pub fn decode(&self, root: &Path) -> Result<Element, String> {
        element_from_node(self.kind, &self.node, root)
    }
}

/// Minimal element tree built from reader events.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
    text: String,
}

impl Node {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Header values written on the root element.
pub(crate) struct Header<'a> {
    pub identifier: Option<&'a str>,
    pub start: Option<DateTime<Utc>>,
    pub duration: u64,
}

/// Serialize a manifest document.
///
/// Elements are grouped into their kind's section and keep their relative
/// order. File paths are written relative to `root`; an element whose file
/// lies elsewhere cannot be written.
pub(crate) fn write(header: &Header<'_>, elements: &[Element], root: &Path) -> Result<Vec<u8>, String> {
    if let Some(outside) = elements.iter().find(|e| !e.file().starts_with(root)) {
        return Err(format!(
            "{} has its file outside the bundle: {}",
            outside,
            outside.file().display()
        ));
    }
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    write_document(&mut writer, header, elements, root).map_err(|e| e.to_string())?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_document(
    writer: &mut Writer<Vec<u8>>,
    header: &Header<'_>,
    elements: &[Element],
    root: &Path,
) -> quick_xml::Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut bundle = BytesStart::new(ROOT_TAG);
    if let Some(id) = header.identifier {
        bundle.push_attribute(("id", id));
    }
    let start = header
        .start
        .map(|s| s.to_rfc3339_opts(SecondsFormat::Millis, true));
    if let Some(start) = &start {
        bundle.push_attribute(("start", start.as_str()));
    }
    let duration = header.duration.to_string();
    if header.duration > 0 {
        bundle.push_attribute(("duration", duration.as_str()));
    }
    writer.write_event(Event::Start(bundle))?;

    for kind in ElementKind::ALL {
        let mut section = elements.iter().filter(|e| e.kind() == kind).peekable();
        if section.peek().is_none() {
            continue;
        }
        writer.write_event(Event::Start(BytesStart::new(kind.section_tag())))?;
        for element in section {
            write_element(writer, element, header.identifier, root)?;
        }
        writer.write_event(Event::End(BytesEnd::new(kind.section_tag())))?;
    }

    writer.write_event(Event::End(BytesEnd::new(ROOT_TAG)))?;
    Ok(())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &Element,
    bundle_id: Option<&str>,
    root: &Path,
) -> quick_xml::Result<()> {
    let tag = element.kind().xml_tag();
    let flavor = element.flavor().to_string();
    let reference = element
        .reference()
        .filter(|r| !points_at_bundle(r, bundle_id))
        .map(|r| r.to_string());

    let mut start = BytesStart::new(tag);
    if let Some(id) = element.id() {
        start.push_attribute(("id", id));
    }
    start.push_attribute(("type", flavor.as_str()));
    if let Some(reference) = &reference {
        start.push_attribute(("ref", reference.as_str()));
    }
    writer.write_event(Event::Start(start))?;

    if let Some(description) = element.description() {
        text_element(writer, "Description", description)?;
    }
    text_element(writer, "MimeType", &element.mime_type().to_string())?;
    if let Some(checksum) = element.checksum() {
        let mut node = BytesStart::new("Checksum");
        node.push_attribute(("type", checksum.kind().name()));
        writer.write_event(Event::Start(node))?;
        writer.write_event(Event::Text(BytesText::new(checksum.value())))?;
        writer.write_event(Event::End(BytesEnd::new("Checksum")))?;
    }
    text_element(writer, "File", &relative_file(element, root))?;

    if let Some(track) = element.track_info() {
        if track.duration > 0 {
            text_element(writer, "Duration", &track.duration.to_string())?;
        }
        if let Some(audio) = &track.audio {
            write_audio(writer, audio)?;
        }
        if let Some(video) = &track.video {
            write_video(writer, video)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_audio(writer: &mut Writer<Vec<u8>>, audio: &AudioSettings) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("Audio")))?;
    device_element(writer, "Device", audio.device.as_ref())?;
    device_element(writer, "Encoder", audio.encoder.as_ref())?;
    if let Some(channels) = audio.channels {
        text_element(writer, "Channels", &channels.to_string())?;
    }
    if let Some(bit_depth) = audio.bit_depth {
        text_element(writer, "BitDepth", &bit_depth.to_string())?;
    }
    if let Some(bit_rate) = audio.bit_rate {
        text_element(writer, "BitRate", &bit_rate.to_string())?;
    }
    if let Some(sampling_rate) = audio.sampling_rate {
        text_element(writer, "SamplingRate", &sampling_rate.to_string())?;
    }
    writer.write_event(Event::End(BytesEnd::new("Audio")))?;
    Ok(())
}

fn write_video(writer: &mut Writer<Vec<u8>>, video: &VideoSettings) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("Video")))?;
    device_element(writer, "Device", video.device.as_ref())?;
    device_element(writer, "Encoder", video.encoder.as_ref())?;
    text_element(writer, "Size", &video.size())?;
    if let Some(scan_type) = video.scan_type {
        let mut node = BytesStart::new("ScanType");
        node.push_attribute(("type", scan_type.as_str()));
        if let Some(order) = video.scan_order {
            node.push_attribute(("order", order.as_str()));
        }
        writer.write_event(Event::Empty(node))?;
    }
    if let Some(bit_rate) = video.bit_rate {
        text_element(writer, "BitRate", &bit_rate.to_string())?;
    }
    if let Some(frame_rate) = video.frame_rate {
        text_element(writer, "FrameRate", &frame_rate.to_string())?;
    }
    writer.write_event(Event::End(BytesEnd::new("Video")))?;
    Ok(())
}

fn device_element(
    writer: &mut Writer<Vec<u8>>,
    tag: &str,
    device: Option<&DeviceInfo>,
) -> quick_xml::Result<()> {
    let Some(device) = device.filter(|d| !d.is_empty()) else {
        return Ok(());
    };
    let mut node = BytesStart::new(tag);
    for (key, value) in [
        ("type", &device.ty),
        ("version", &device.version),
        ("vendor", &device.vendor),
    ] {
        if let Some(value) = value {
            node.push_attribute((key, value.as_str()));
        }
    }
    writer.write_event(Event::Empty(node))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, tag: &str, text: &str) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn points_at_bundle(reference: &Reference, bundle_id: Option<&str>) -> bool {
    reference.ty() == BUNDLE_TYPE
        && (reference.identifier() == SELF || Some(reference.identifier()) == bundle_id)
}

fn relative_file(element: &Element, root: &Path) -> String {
    let file = element.file();
    file.strip_prefix(root)
        .unwrap_or(file.as_path())
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Reading
// ============================================================================

/// Parse a manifest document into its header and entries.
pub(crate) fn read(content: &str) -> Result<Document, String> {
    let root = parse_tree(content)?;
    if root.name != ROOT_TAG {
        return Err(format!("expected <{}> root element, found <{}>", ROOT_TAG, root.name));
    }

    let start = root
        .attribute("start")
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| format!("malformed start date '{}': {}", s, e))
        })
        .transpose()?;
    let duration = root
        .attribute("duration")
        .map(|d| {
            d.parse::<u64>()
                .map_err(|e| format!("malformed duration '{}': {}", d, e))
        })
        .transpose()?
        .unwrap_or(0);

    let identifier = root.attribute("id").map(str::to_string);

    let mut entries = Vec::new();
    for section in root.children {
        let Some(kind) = ElementKind::ALL
            .into_iter()
            .find(|k| k.section_tag() == section.name)
        else {
            continue;
        };
        for node in section.children {
            if node.name != kind.xml_tag() {
                continue;
            }
            entries.push(Entry {
                kind,
                id: node.attribute("id").map(str::to_string),
                node,
            });
        }
    }

    Ok(Document {
        identifier,
        start,
        duration,
        entries,
    })
}

fn parse_tree(content: &str) -> Result<Node, String> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => stack.push(node_from_start(&e)?),
            Event::Empty(e) => {
                let node = node_from_start(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::End(_) => {
                let node = stack.pop().ok_or("unbalanced end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(t) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::Eof => return Err("unexpected end of document".to_string()),
            _ => {}
        }
    }
}

fn node_from_start(e: &BytesStart<'_>) -> Result<Node, String> {
    let mut node = Node {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..Node::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn element_from_node(kind: ElementKind, node: &Node, root: &Path) -> Result<Element, String> {
    let flavor_attr = node
        .attribute("type")
        .ok_or_else(|| format!("{} entry has no flavor", kind))?;
    let flavor = Flavor::parse(flavor_attr).map_err(|e| e.to_string())?;

    let file = node
        .child_text("File")
        .ok_or_else(|| format!("{} entry has no file", kind))?;
    let file: PathBuf = root.join(bundle_relative(file)?);

    let mime_type = match node.child_text("MimeType") {
        Some(m) => MimeType::parse(m).map_err(|e| e.to_string())?,
        None => MimeType::from_path(&file).unwrap_or_else(|_| MimeType::octet_stream()),
    };

    let body = match kind {
        ElementKind::Track => ElementBody::Track(track_from_node(node)?),
        other => ElementBody::empty(other),
    };

    let mut element = Element::new(body, flavor, mime_type, &file);
    if let Some(id) = node.attribute("id") {
        if !is_valid_identifier(id) {
            return Err(format!("{} entry has invalid identifier '{}'", kind, id));
        }
        element = element.with_id(id);
    }
    if let Some(description) = node.child_text("Description") {
        element = element.with_description(description);
    }
    if let Some(checksum) = node.child("Checksum") {
        let kind = checksum
            .attribute("type")
            .unwrap_or(ChecksumType::Md5.name())
            .parse::<ChecksumType>()
            .map_err(|e| e.to_string())?;
        let value = Checksum::new(kind, &checksum.text).map_err(|e| e.to_string())?;
        element = element.with_checksum(value);
    }
    if let Some(reference) = node.attribute("ref") {
        let reference = Reference::parse(reference).map_err(|e| e.to_string())?;
        if !reference.is_bundle() {
            element = element.with_reference(reference);
        }
    }
    Ok(element)
}

/// Parse a `<File>` value, accepting only plain relative components.
fn bundle_relative(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    let plain = path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(part) if !part.to_string_lossy().contains('\\')));
    if plain {
        Ok(path.to_path_buf())
    } else {
        Err(format!("file '{}' is outside the bundle", file))
    }
}

fn track_from_node(node: &Node) -> Result<TrackInfo, String> {
    let duration = node
        .child_text("Duration")
        .map(|d| d.parse::<u64>().map_err(|e| format!("malformed duration '{}': {}", d, e)))
        .transpose()?
        .unwrap_or(0);
    let audio = node.child("Audio").map(audio_from_node).transpose()?;
    let video = node.child("Video").map(video_from_node).transpose()?;
    Ok(TrackInfo {
        duration,
        audio,
        video,
    })
}

fn audio_from_node(node: &Node) -> Result<AudioSettings, String> {
    Ok(AudioSettings {
        device: node.child("Device").map(device_from_node),
        encoder: node.child("Encoder").map(device_from_node),
        channels: number(node, "Channels")?,
        bit_depth: number(node, "BitDepth")?,
        bit_rate: number(node, "BitRate")?,
        sampling_rate: number(node, "SamplingRate")?,
    })
}

fn video_from_node(node: &Node) -> Result<VideoSettings, String> {
    let size = node
        .child_text("Size")
        .ok_or_else(|| "video size is missing".to_string())?;
    let (frame_width, frame_height) = VideoSettings::parse_size(size).map_err(|e| e.to_string())?;
    let scan = node.child("ScanType");
    Ok(VideoSettings {
        device: node.child("Device").map(device_from_node),
        encoder: node.child("Encoder").map(device_from_node),
        bit_rate: number(node, "BitRate")?,
        frame_rate: number(node, "FrameRate")?,
        frame_width,
        frame_height,
        scan_type: scan
            .and_then(|s| s.attribute("type"))
            .map(str::parse)
            .transpose()?,
        scan_order: scan
            .and_then(|s| s.attribute("order"))
            .map(str::parse)
            .transpose()?,
    })
}

fn device_from_node(node: &Node) -> DeviceInfo {
    DeviceInfo {
        ty: node.attribute("type").map(str::to_string),
        version: node.attribute("version").map(str::to_string),
        vendor: node.attribute("vendor").map(str::to_string),
    }
}

fn number<T: std::str::FromStr>(node: &Node, tag: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    node.child_text(tag)
        .map(|v| v.parse::<T>().map_err(|e| format!("malformed {} '{}': {}", tag, v, e)))
        .transpose()
}

//! In-memory libvirt domain descriptor.
//!
//! The descriptor keeps the domain XML as a flat list of owned `quick-xml`
//! events. Disks are addressed through [`DiskHandle`]s, which are positions of
//! the disk's `<source>` element in that list, so callers never hold a
//! reference into the tree. Everything that is not rewritten is serialized
//! back exactly as it was read.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::{MigrationError, Result};

/// Opaque handle to a disk's `<source>` node inside a [`DomainDescriptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiskHandle(usize);

/// Storage class a disk must match to be considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskClass<'a> {
    /// `disk/@type`
    pub disk_type: &'a str,
    /// `disk/driver/@type`
    pub driver_type: &'a str,
    /// `disk/@device`
    pub device: &'a str,
}

impl DiskClass<'static> {
    /// Block-backed raw disks, the only class that lives on LVM.
    pub const BLOCK_RAW_DISK: DiskClass<'static> = DiskClass {
        disk_type: "block",
        driver_type: "raw",
        device: "disk",
    };
}

/// A disk found in the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskNode {
    /// `target/@dev`, e.g. `vda`
    pub device_id: String,
    /// `source/@dev` at the time the disk was found
    pub source_path: String,
    /// Handle used to read or rewrite the source later
    pub handle: DiskHandle,
}

/// Only disks of domains with this hypervisor type are considered.
const DOMAIN_TYPE: &str = "kvm";

/// Owned, mutable libvirt domain XML.
#[derive(Debug, Clone)]
pub struct DomainDescriptor {
    events: Vec<Event<'static>>,
}

/// Disk being collected while walking `<devices>`.
#[derive(Default)]
struct DiskScan {
    class_matches: bool,
    driver_matches: bool,
    source: Option<(usize, Option<String>)>,
    target: Option<String>,
}

impl DomainDescriptor {
    /// Parse raw domain XML.
    pub fn load(raw: &str) -> Result<Self> {
        let mut reader = Reader::from_str(raw);
        let mut events = Vec::new();
        let mut depth = 0usize;
        let mut saw_root = false;

        loop {
            let event = reader.read_event().map_err(|e| {
                MigrationError::XmlParse(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;

            match &event {
                Event::Eof => break,
                Event::Start(_) => {
                    depth += 1;
                    saw_root = true;
                }
                Event::Empty(_) => saw_root = true,
                Event::End(_) => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        MigrationError::XmlParse("unexpected closing tag".to_string())
                    })?;
                }
                _ => {}
            }

            events.push(event.into_owned());
        }

        if !saw_root {
            return Err(MigrationError::XmlParse("document has no root element".to_string()));
        }
        if depth != 0 {
            return Err(MigrationError::XmlParse("document ends inside an open element".to_string()));
        }

        Ok(Self { events })
    }

    /// Find every `/domain[@type='kvm']/devices/disk` matching `class`,
    /// in document order.
    pub fn find_disks_of_class(&self, class: &DiskClass<'_>) -> Result<Vec<DiskNode>> {
        let mut disks = Vec::new();
        let mut stack: Vec<Vec<u8>> = Vec::new();
        let mut domain_matches = false;
        let mut scan: Option<DiskScan> = None;

        for (idx, event) in self.events.iter().enumerate() {
            match event {
                Event::Start(e) | Event::Empty(e) => {
                    let name = e.name().as_ref().to_vec();
                    let path: Vec<&[u8]> = stack.iter().map(Vec::as_slice).collect();

                    match path.as_slice() {
                        [] if name == b"domain" => {
                            domain_matches = attr(e, b"type")?.as_deref() == Some(DOMAIN_TYPE);
                        }
                        [b"domain", b"devices"] if name == b"disk" && matches!(event, Event::Start(_)) => {
                            scan = Some(DiskScan {
                                class_matches: attr(e, b"type")?.as_deref() == Some(class.disk_type)
                                    && attr(e, b"device")?.as_deref() == Some(class.device),
                                ..Default::default()
                            });
                        }
                        [b"domain", b"devices", b"disk"] => {
                            if let Some(scan) = scan.as_mut() {
                                match name.as_slice() {
                                    b"driver" => {
                                        if attr(e, b"type")?.as_deref() == Some(class.driver_type) {
                                            scan.driver_matches = true;
                                        }
                                    }
                                    b"source" if scan.source.is_none() => {
                                        scan.source = Some((idx, attr(e, b"dev")?));
                                    }
                                    b"target" if scan.target.is_none() => {
                                        scan.target = attr(e, b"dev")?;
                                    }
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }

                    if matches!(event, Event::Start(_)) {
                        stack.push(name);
                    }
                }
                Event::End(_) => {
                    let closed = stack.pop();
                    let at_devices = stack.len() == 2 && stack[0] == b"domain" && stack[1] == b"devices";
                    if at_devices && closed.as_deref() == Some(b"disk".as_slice()) {
                        if let Some(done) = scan.take() {
                            if domain_matches && done.class_matches && done.driver_matches {
                                disks.push(finish_disk(done)?);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(disks)
    }

    /// Current `dev` attribute of the disk's `<source>`.
    pub fn source_path(&self, handle: DiskHandle) -> Result<String> {
        let start = self.source_node(handle)?;
        attr(start, b"dev")?.ok_or_else(|| {
            MigrationError::DiskDefinition("disk source has no 'dev' attribute".to_string())
        })
    }

    /// Point the disk's `<source dev=...>` at `path`.
    pub fn set_source_path(&mut self, handle: DiskHandle, path: &str) -> Result<()> {
        let rewritten = match self.events.get(handle.0) {
            Some(Event::Start(e)) => Event::Start(with_attr(e, "dev", path)?),
            Some(Event::Empty(e)) => Event::Empty(with_attr(e, "dev", path)?),
            _ => return Err(invalid_handle(handle)),
        };
        self.events[handle.0] = rewritten;
        Ok(())
    }

    /// Render the descriptor back to XML.
    pub fn serialize(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        for event in &self.events {
            writer.write_event(event.clone())?;
        }
        String::from_utf8(writer.into_inner())
            .map_err(|e| MigrationError::XmlParse(format!("serialized XML is not UTF-8: {}", e)))
    }

    fn source_node(&self, handle: DiskHandle) -> Result<&BytesStart<'static>> {
        match self.events.get(handle.0) {
            Some(Event::Start(e)) | Some(Event::Empty(e)) if e.name().as_ref() == b"source" => Ok(e),
            _ => Err(invalid_handle(handle)),
        }
    }
}

fn finish_disk(scan: DiskScan) -> Result<DiskNode> {
    let device_id = scan.target.ok_or_else(|| {
        MigrationError::DiskDefinition("block disk without <target dev=...>".to_string())
    })?;
    let (idx, dev) = scan.source.ok_or_else(|| {
        MigrationError::DiskDefinition(format!("disk {} has no <source> element", device_id))
    })?;
    let source_path = dev.ok_or_else(|| {
        MigrationError::DiskDefinition(format!("disk {} source has no 'dev' attribute", device_id))
    })?;

    Ok(DiskNode {
        device_id,
        source_path,
        handle: DiskHandle(idx),
    })
}

fn invalid_handle(handle: DiskHandle) -> MigrationError {
    MigrationError::DiskDefinition(format!("handle {} does not point at a disk source", handle.0))
}

/// Read and unescape an attribute value.
fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == key {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Copy of `e` with `key` set to `value`, other attributes kept in order.
fn with_attr(e: &BytesStart<'_>, key: &str, value: &str) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut replaced = false;

    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == key.as_bytes() {
            out.push_attribute((key, value));
            replaced = true;
        } else {
            out.push_attribute(a);
        }
    }
    if !replaced {
        out.push_attribute((key, value));
    }

    Ok(out)
}

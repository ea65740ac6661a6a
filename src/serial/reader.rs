use std::convert::TryFrom;
use std::sync::Arc;

use num_traits::FromPrimitive;

use super::{
    CodecError, TypeCode, BASE_HANDLE, SC_BLOCK_DATA, SC_EXTERNALIZABLE, SC_SERIALIZABLE,
    SC_WRITE_METHOD, STREAM_MAGIC, STREAM_VERSION,
};
use crate::util::decode_modified_utf8;

const MAX_DEPTH: usize = 128;

type Result<T> = std::result::Result<T, CodecError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDesc {
    pub name: String,
    pub suid: i64,
    pub flags: u8,
    pub fields: Vec<FieldDesc>,
    pub annotations: Vec<Content>,
    pub super_class: Option<Arc<ClassDesc>>,
    /// Interface names when this describes a dynamic proxy class.
    pub proxy_interfaces: Option<Vec<String>>,
}

impl ClassDesc {
    pub fn is_proxy(&self) -> bool {
        self.proxy_interfaces.is_some()
    }

    /// Class chain ordered from the topmost serializable ancestor down to `self`,
    /// which is the order class data appears in the stream.
    pub fn hierarchy(self: &Arc<Self>) -> Vec<Arc<ClassDesc>> {
        let mut chain = Vec::new();
        let mut current = Some(Arc::clone(self));
        while let Some(desc) = current {
            current = desc.super_class.clone();
            chain.push(desc);
        }
        chain.reverse();
        chain
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub type_code: char,
    pub name: String,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Null,
    Reference(u32),
    String(String),
    Object(Object),
    Array(Array),
    Enum {
        desc: Arc<ClassDesc>,
        constant: Box<Content>,
    },
    Class(Arc<ClassDesc>),
    ClassDesc(Arc<ClassDesc>),
    BlockData(Vec<u8>),
    Exception(Box<Content>),
}

impl Content {
    pub fn is_null(&self) -> bool {
        matches!(self, Content::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Content::Null => "null",
            Content::Reference(_) => "reference",
            Content::String(_) => "string",
            Content::Object(_) => "object",
            Content::Array(_) => "array",
            Content::Enum { .. } => "enum",
            Content::Class(_) => "class",
            Content::ClassDesc(_) => "class descriptor",
            Content::BlockData(_) => "block data",
            Content::Exception(_) => "exception",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub handle: u32,
    pub desc: Arc<ClassDesc>,
    /// Per-class data, topmost ancestor first.
    pub data: Vec<ClassData>,
}

impl Object {
    pub fn class_name(&self) -> &str {
        &self.desc.name
    }

    pub fn class_data(&self, class_name: &str) -> Option<&ClassData> {
        self.data.iter().find(|data| data.class_name == class_name)
    }

    /// Looks a field up by name, the most derived declaration winning.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.iter().rev().find_map(|data| data.field(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassData {
    pub class_name: String,
    pub values: Vec<(String, Value)>,
    /// Block data and objects written by `writeObject`/`writeExternal`.
    pub annotations: Vec<Content>,
}

impl ClassData {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub handle: u32,
    pub desc: Arc<ClassDesc>,
    pub elements: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(i8),
    Char(u16),
    Double(f64),
    Float(f32),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Object(Content),
}

impl Value {
    pub fn as_content(&self) -> Option<&Content> {
        match self {
            Value::Object(content) => Some(content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Pending,
    Desc(Arc<ClassDesc>),
    Content(Content),
}

/// The handle table of a parsed stream, needed to follow `TC_REFERENCE`s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handles {
    entries: Vec<Entry>,
}

impl Handles {
    fn assign(&mut self) -> u32 {
        self.entries.push(Entry::Pending);
        BASE_HANDLE + (self.entries.len() as u32 - 1)
    }

    fn set(&mut self, handle: u32, entry: Entry) {
        if let Some(slot) = handle
            .checked_sub(BASE_HANDLE)
            .and_then(|index| self.entries.get_mut(index as usize))
        {
            *slot = entry;
        }
    }

    fn get(&self, handle: u32) -> Option<&Entry> {
        handle
            .checked_sub(BASE_HANDLE)
            .and_then(|index| self.entries.get(index as usize))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Follows references until a concrete content is reached. Dangling or
    /// not-yet-completed handles resolve to the reference itself.
    pub fn resolve<'a>(&'a self, content: &'a Content) -> &'a Content {
        let mut current = content;
        for _ in 0..8 {
            match current {
                Content::Reference(handle) => match self.get(*handle) {
                    Some(Entry::Content(target)) => current = target,
                    _ => return current,
                },
                _ => return current,
            }
        }
        current
    }

    pub fn resolve_string<'a>(&'a self, content: &'a Content) -> Option<&'a str> {
        match self.resolve(content) {
            Content::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Incremental parser over a complete or partial serialization stream.
///
/// Every read past the end of the input yields [`CodecError::Incomplete`], so
/// callers reading from a socket can retry once more bytes have arrived.
pub struct StreamReader<'a> {
    input: &'a [u8],
    pos: usize,
    handles: Handles,
    codebases: Vec<String>,
    depth: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            handles: Handles::default(),
            codebases: Vec::new(),
            depth: 0,
        }
    }

    pub fn read_header(&mut self) -> Result<()> {
        let magic = self.read_u16()?;
        let version = self.read_u16()?;
        if magic != STREAM_MAGIC || version != STREAM_VERSION {
            return Err(CodecError::BadHeader);
        }
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn handles(&self) -> &Handles {
        &self.handles
    }

    /// Hands back the handle table and every class annotation string seen,
    /// which on RMI streams are codebase URLs.
    pub fn into_parts(self) -> (Handles, Vec<String>) {
        (self.handles, self.codebases)
    }

    /// Reads one top-level content element, block data included.
    pub fn read_content(&mut self) -> Result<Content> {
        self.next_content(true)
    }

    fn next_content(&mut self, block_allowed: bool) -> Result<Content> {
        self.depth += 1;
        let result = if self.depth > MAX_DEPTH {
            Err(CodecError::InvalidData("nesting too deep"))
        } else {
            self.next_content_at_depth(block_allowed)
        };
        self.depth -= 1;
        result
    }

    fn next_content_at_depth(&mut self, block_allowed: bool) -> Result<Content> {
        loop {
            let tc = self.peek_u8()?;
            let code = TypeCode::from_u8(tc).ok_or(CodecError::UnknownTypeCode(tc))?;
            if matches!(code, TypeCode::ClassDesc | TypeCode::ProxyClassDesc) {
                return Ok(self
                    .read_class_desc()?
                    .map(Content::ClassDesc)
                    .unwrap_or(Content::Null));
            }
            self.pos += 1;
            return match code {
                TypeCode::ClassDesc | TypeCode::ProxyClassDesc => {
                    Err(CodecError::InvalidData("class descriptor out of place"))
                }
                TypeCode::Reset => {
                    self.handles.clear();
                    continue;
                }
                TypeCode::Null => Ok(Content::Null),
                TypeCode::Reference => Ok(Content::Reference(self.read_handle()?)),
                TypeCode::String => {
                    let handle = self.handles.assign();
                    let value = self.read_utf()?;
                    Ok(self.register_string(handle, value))
                }
                TypeCode::LongString => {
                    let handle = self.handles.assign();
                    let len = self.read_i64()?;
                    let len = usize::try_from(len)
                        .map_err(|_| CodecError::InvalidData("negative string length"))?;
                    let value = decode_modified_utf8(self.take(len)?);
                    Ok(self.register_string(handle, value))
                }
                TypeCode::Object => self.read_new_object(),
                TypeCode::Array => self.read_new_array(),
                TypeCode::Enum => {
                    let desc = self
                        .read_class_desc()?
                        .ok_or(CodecError::InvalidData("enum without class descriptor"))?;
                    let handle = self.handles.assign();
                    let constant = Box::new(self.next_content(false)?);
                    let content = Content::Enum { desc, constant };
                    self.handles.set(handle, Entry::Content(content.clone()));
                    Ok(content)
                }
                TypeCode::Class => {
                    let desc = self
                        .read_class_desc()?
                        .ok_or(CodecError::InvalidData("class without descriptor"))?;
                    let handle = self.handles.assign();
                    let content = Content::Class(desc);
                    self.handles.set(handle, Entry::Content(content.clone()));
                    Ok(content)
                }
                TypeCode::BlockData | TypeCode::BlockDataLong if !block_allowed => {
                    Err(CodecError::InvalidData("unexpected block data"))
                }
                TypeCode::BlockData => {
                    let len = usize::from(self.read_u8()?);
                    Ok(Content::BlockData(self.take(len)?.to_vec()))
                }
                TypeCode::BlockDataLong => {
                    let len = usize::try_from(self.read_i32()?)
                        .map_err(|_| CodecError::InvalidData("negative block length"))?;
                    Ok(Content::BlockData(self.take(len)?.to_vec()))
                }
                TypeCode::EndBlockData => Err(CodecError::InvalidData("unexpected end of block data")),
                TypeCode::Exception => {
                    self.handles.clear();
                    let thrown = self.next_content(false)?;
                    self.handles.clear();
                    Ok(Content::Exception(Box::new(thrown)))
                }
            };
        }
    }

    fn register_string(&mut self, handle: u32, value: String) -> Content {
        let content = Content::String(value);
        self.handles.set(handle, Entry::Content(content.clone()));
        content
    }

    /// Super classes nest like contents and count against the same depth.
    fn read_class_desc(&mut self) -> Result<Option<Arc<ClassDesc>>> {
        self.depth += 1;
        let result = if self.depth > MAX_DEPTH {
            Err(CodecError::InvalidData("class hierarchy too deep"))
        } else {
            self.read_class_desc_at_depth()
        };
        self.depth -= 1;
        result
    }

    fn read_class_desc_at_depth(&mut self) -> Result<Option<Arc<ClassDesc>>> {
        let tc = self.read_u8()?;
        match TypeCode::from_u8(tc) {
            Some(TypeCode::Null) => Ok(None),
            Some(TypeCode::Reference) => {
                let handle = self.read_handle()?;
                match self.handles.get(handle) {
                    Some(Entry::Desc(desc)) => Ok(Some(Arc::clone(desc))),
                    _ => Err(CodecError::BadHandle(handle)),
                }
            }
            Some(TypeCode::ClassDesc) => {
                let name = self.read_utf()?;
                let suid = self.read_i64()?;
                let handle = self.handles.assign();
                let flags = self.read_u8()?;
                let count = usize::try_from(self.read_i16()?)
                    .map_err(|_| CodecError::InvalidData("negative field count"))?;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(self.read_field_desc()?);
                }
                let annotations = self.read_block_contents(true)?;
                let super_class = self.read_class_desc()?;
                let desc = Arc::new(ClassDesc {
                    name,
                    suid,
                    flags,
                    fields,
                    annotations,
                    super_class,
                    proxy_interfaces: None,
                });
                self.handles.set(handle, Entry::Desc(Arc::clone(&desc)));
                Ok(Some(desc))
            }
            Some(TypeCode::ProxyClassDesc) => {
                let handle = self.handles.assign();
                let count = usize::try_from(self.read_i32()?)
                    .map_err(|_| CodecError::InvalidData("negative interface count"))?;
                let mut interfaces = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    interfaces.push(self.read_utf()?);
                }
                let annotations = self.read_block_contents(true)?;
                let super_class = self.read_class_desc()?;
                let desc = Arc::new(ClassDesc {
                    name: "$Proxy".to_owned(),
                    suid: 0,
                    flags: SC_SERIALIZABLE,
                    fields: Vec::new(),
                    annotations,
                    super_class,
                    proxy_interfaces: Some(interfaces),
                });
                self.handles.set(handle, Entry::Desc(Arc::clone(&desc)));
                Ok(Some(desc))
            }
            Some(_) => Err(CodecError::InvalidData("expected class descriptor")),
            None => Err(CodecError::UnknownTypeCode(tc)),
        }
    }

    fn read_field_desc(&mut self) -> Result<FieldDesc> {
        let type_code = char::from(self.read_u8()?);
        let name = self.read_utf()?;
        let class_name = match type_code {
            'L' | '[' => Some(self.read_type_string()?),
            'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' => None,
            _ => return Err(CodecError::InvalidData("unknown field type")),
        };
        Ok(FieldDesc {
            type_code,
            name,
            class_name,
        })
    }

    fn read_type_string(&mut self) -> Result<String> {
        let content = self.next_content(false)?;
        self.handles
            .resolve_string(&content)
            .map(str::to_owned)
            .ok_or(CodecError::InvalidData("field type is not a string"))
    }

    /// Contents up to and including `TC_ENDBLOCKDATA`.
    fn read_block_contents(&mut self, class_annotation: bool) -> Result<Vec<Content>> {
        let mut contents = Vec::new();
        loop {
            if self.peek_u8()? == TypeCode::EndBlockData.byte() {
                self.pos += 1;
                return Ok(contents);
            }
            let content = self.next_content(true)?;
            if class_annotation {
                if let Some(codebase) = self.handles.resolve_string(&content) {
                    self.codebases.push(codebase.to_owned());
                }
            }
            contents.push(content);
        }
    }

    fn read_new_object(&mut self) -> Result<Content> {
        let desc = self
            .read_class_desc()?
            .ok_or(CodecError::InvalidData("object without class descriptor"))?;
        let handle = self.handles.assign();
        let mut data = Vec::new();
        for class in desc.hierarchy() {
            data.push(self.read_class_data(&class)?);
        }
        let content = Content::Object(Object { handle, desc, data });
        self.handles.set(handle, Entry::Content(content.clone()));
        Ok(content)
    }

    fn read_class_data(&mut self, class: &ClassDesc) -> Result<ClassData> {
        let mut data = ClassData {
            class_name: class.name.clone(),
            values: Vec::new(),
            annotations: Vec::new(),
        };
        if class.flags & SC_EXTERNALIZABLE != 0 {
            if class.flags & SC_BLOCK_DATA == 0 {
                return Err(CodecError::InvalidData(
                    "externalizable data without block mode",
                ));
            }
            data.annotations = self.read_block_contents(false)?;
            return Ok(data);
        }
        if class.flags & SC_SERIALIZABLE != 0 {
            for field in &class.fields {
                let value = self.read_value(field.type_code)?;
                data.values.push((field.name.clone(), value));
            }
            if class.flags & SC_WRITE_METHOD != 0 {
                data.annotations = self.read_block_contents(false)?;
            }
        }
        Ok(data)
    }

    fn read_new_array(&mut self) -> Result<Content> {
        let desc = self
            .read_class_desc()?
            .ok_or(CodecError::InvalidData("array without class descriptor"))?;
        let handle = self.handles.assign();
        let len = usize::try_from(self.read_i32()?)
            .map_err(|_| CodecError::InvalidData("negative array length"))?;
        let element_type = desc
            .name
            .chars()
            .nth(1)
            .ok_or(CodecError::InvalidData("array class name too short"))?;
        let remaining = self.input.len().saturating_sub(self.pos);
        let mut elements = Vec::with_capacity(len.min(remaining));
        for _ in 0..len {
            elements.push(self.read_value(element_type)?);
        }
        let content = Content::Array(Array {
            handle,
            desc,
            elements,
        });
        self.handles.set(handle, Entry::Content(content.clone()));
        Ok(content)
    }

    fn read_value(&mut self, type_code: char) -> Result<Value> {
        Ok(match type_code {
            'B' => Value::Byte(self.read_u8()? as i8),
            'C' => Value::Char(self.read_u16()?),
            'D' => Value::Double(f64::from_bits(self.read_i64()? as u64)),
            'F' => Value::Float(f32::from_bits(self.read_i32()? as u32)),
            'I' => Value::Int(self.read_i32()?),
            'J' => Value::Long(self.read_i64()?),
            'S' => Value::Short(self.read_i16()?),
            'Z' => Value::Boolean(self.read_u8()? != 0),
            'L' | '[' => Value::Object(self.next_content(false)?),
            _ => return Err(CodecError::InvalidData("unknown value type")),
        })
    }

    fn read_handle(&mut self) -> Result<u32> {
        let handle = self.read_i32()? as u32;
        if handle < BASE_HANDLE {
            return Err(CodecError::BadHandle(handle));
        }
        Ok(handle)
    }

    fn read_utf(&mut self) -> Result<String> {
        let len = usize::from(self.read_u16()?);
        Ok(decode_modified_utf8(self.take(len)?))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(CodecError::Incomplete)?;
        let bytes = self.input.get(self.pos..end).ok_or(CodecError::Incomplete)?;
        self.pos = end;
        Ok(bytes)
    }

    fn peek_u8(&self) -> Result<u8> {
        self.input.get(self.pos).copied().ok_or(CodecError::Incomplete)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(buf))
    }
}

/// Reads primitives out of the block data written by a custom
/// `writeObject`/`writeExternal`, crossing block boundaries the way
/// `ObjectInputStream` does, and hands out the objects in between.
pub struct BlockCursor<'a> {
    items: &'a [Content],
    index: usize,
    offset: usize,
}

impl<'a> BlockCursor<'a> {
    pub fn new(items: &'a [Content]) -> Self {
        Self {
            items,
            index: 0,
            offset: 0,
        }
    }

    fn take(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            match self.items.get(self.index) {
                Some(Content::BlockData(bytes)) => {
                    let available = &bytes[self.offset..];
                    let wanted = (len - out.len()).min(available.len());
                    out.extend_from_slice(&available[..wanted]);
                    self.offset += wanted;
                    if self.offset >= bytes.len() {
                        self.index += 1;
                        self.offset = 0;
                    }
                }
                Some(_) => return Err(CodecError::InvalidData("expected block data")),
                None => return Err(CodecError::InvalidData("block data exhausted")),
            }
        }
        Ok(out)
    }

    /// Bytes left in the current block, if the cursor sits inside one.
    pub fn remaining_in_block(&self) -> &'a [u8] {
        match self.items.get(self.index) {
            Some(Content::BlockData(bytes)) => &bytes[self.offset..],
            _ => &[],
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.take(8)?);
        Ok(i64::from_be_bytes(buf))
    }

    pub fn read_utf(&mut self) -> Result<String> {
        let len = usize::from(self.read_i16()? as u16);
        Ok(decode_modified_utf8(&self.take(len)?))
    }

    pub fn next_object(&mut self) -> Result<&'a Content> {
        if let Some(Content::BlockData(bytes)) = self.items.get(self.index) {
            if self.offset < bytes.len() {
                return Err(CodecError::InvalidData("unread block data before object"));
            }
            self.index += 1;
            self.offset = 0;
        }
        match self.items.get(self.index) {
            Some(Content::BlockData(_)) | None => {
                Err(CodecError::InvalidData("expected an object"))
            }
            Some(content) => {
                self.index += 1;
                Ok(content)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{ClassSpec, FieldSpec, StreamWriter};

    fn stream(build: impl FnOnce(&mut StreamWriter)) -> Vec<u8> {
        let mut writer = StreamWriter::new();
        build(&mut writer);
        writer.finish()
    }

    #[test]
    fn reads_object_with_self_reference_and_write_method_data() {
        let bytes = stream(|w| {
            let fields = [
                FieldSpec::object("cause", "Ljava/lang/Throwable;"),
                FieldSpec::object("detailMessage", "Ljava/lang/String;"),
            ];
            let handle = w.begin_object(&[ClassSpec {
                name: "java.lang.Throwable",
                suid: -3042686055658047285,
                flags: SC_SERIALIZABLE | SC_WRITE_METHOD,
                fields: &fields,
                annotation: Some("http://10.0.0.1/"),
            }]);
            w.write_reference(handle);
            w.write_string("boom");
            w.end_block();
        });

        let mut reader = StreamReader::new(&bytes);
        reader.read_header().unwrap();
        let content = reader.read_content().unwrap();
        assert!(reader.is_at_end());

        let Content::Object(object) = &content else {
            panic!("expected object, got {:?}", content);
        };
        assert_eq!(object.class_name(), "java.lang.Throwable");
        let (handles, codebases) = reader.into_parts();
        assert_eq!(codebases, vec!["http://10.0.0.1/".to_owned()]);

        let message = object.field("detailMessage").unwrap().as_content().unwrap();
        assert_eq!(handles.resolve_string(message), Some("boom"));
        let cause = object.field("cause").unwrap().as_content().unwrap();
        assert_eq!(cause, &Content::Reference(object.handle));
    }

    #[test]
    fn truncated_input_is_incomplete() {
        let bytes = stream(|w| {
            w.write_string("lookup");
        });
        for cut in 0..bytes.len() {
            let mut reader = StreamReader::new(&bytes[..cut]);
            let result = reader.read_header().and_then(|_| reader.read_content());
            assert_eq!(result, Err(CodecError::Incomplete), "cut at {}", cut);
        }
    }

    #[test]
    fn block_cursor_crosses_blocks_and_objects() {
        let items = vec![
            Content::BlockData(vec![0, 2, b'h']),
            Content::BlockData(vec![b'i', 0, 0]),
            Content::Null,
            Content::BlockData(vec![0, 7]),
        ];
        let mut cursor = BlockCursor::new(&items);
        assert_eq!(cursor.read_utf().unwrap(), "hi");
        assert_eq!(cursor.read_i16().unwrap(), 0);
        assert_eq!(cursor.next_object().unwrap(), &Content::Null);
        assert_eq!(cursor.read_i16().unwrap(), 7);
        assert!(cursor.read_u8().is_err());
    }

    fn class_chain(levels: usize) -> Vec<u8> {
        let mut bytes = vec![0xAC, 0xED, 0x00, 0x05];
        for level in 0..levels {
            let name = format!("C{}", level);
            bytes.push(0x72);
            bytes.extend_from_slice(&(name.len() as u16).to_be_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.extend_from_slice(&1i64.to_be_bytes());
            bytes.extend_from_slice(&[SC_SERIALIZABLE, 0x00, 0x00, 0x78]);
        }
        bytes.push(0x70);
        bytes
    }

    #[test]
    fn long_super_class_chain_is_an_error() {
        let bytes = class_chain(10_000);
        let mut reader = StreamReader::new(&bytes);
        reader.read_header().unwrap();
        assert_eq!(
            reader.read_content(),
            Err(CodecError::InvalidData("class hierarchy too deep"))
        );
    }

    #[test]
    fn moderate_super_class_chain_is_read() {
        let bytes = class_chain(50);
        let mut reader = StreamReader::new(&bytes);
        reader.read_header().unwrap();
        let Content::ClassDesc(desc) = reader.read_content().unwrap() else {
            panic!("expected a class descriptor");
        };
        let chain = desc.hierarchy();
        assert_eq!(chain.len(), 50);
        assert_eq!(chain[0].name, "C49");
        assert!(reader.is_at_end());
    }

    #[test]
    fn rejects_unknown_type_codes() {
        let mut reader = StreamReader::new(&[0xAC, 0xED, 0x00, 0x05, 0x42]);
        reader.read_header().unwrap();
        assert_eq!(reader.read_content(), Err(CodecError::UnknownTypeCode(0x42)));
    }
}

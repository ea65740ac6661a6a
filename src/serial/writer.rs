use bytes::BufMut;

use super::{TypeCode, BASE_HANDLE, SC_SERIALIZABLE, STREAM_MAGIC, STREAM_VERSION};
use crate::util::{encode_modified_utf8, put_utf, Payload};

const MAX_BLOCK: usize = 1024;

/// Describes one class of an object being written.
#[derive(Debug, Clone, Copy)]
pub struct ClassSpec<'a> {
    pub name: &'a str,
    pub suid: i64,
    pub flags: u8,
    pub fields: &'a [FieldSpec<'a>],
    /// Codebase written as the class annotation; `None` writes a null one.
    pub annotation: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec<'a> {
    pub type_code: u8,
    pub name: &'a str,
    pub class_name: Option<&'a str>,
}

impl<'a> FieldSpec<'a> {
    pub const fn primitive(type_code: u8, name: &'a str) -> Self {
        Self {
            type_code,
            name,
            class_name: None,
        }
    }

    /// An object field. `class_name` is the field's type in descriptor form,
    /// e.g. `Ljava/lang/String;`.
    pub const fn object(name: &'a str, class_name: &'a str) -> Self {
        let type_code = match class_name.as_bytes() {
            [first, ..] => *first,
            [] => b'L',
        };
        Self {
            type_code,
            name,
            class_name: Some(class_name),
        }
    }
}

/// Builds an `ObjectOutputStream`-compatible stream.
///
/// Primitives written with the `write_*` methods are buffered as block data
/// and flushed before the next object. `field_*` methods write raw field
/// values, which is what the class data of a serializable object consists of.
/// Handles are assigned in the same order the JDK assigns them, so values
/// returned from `write_string` and `begin_*` can be used with
/// [`StreamWriter::write_reference`].
pub struct StreamWriter {
    out: Vec<u8>,
    block: Vec<u8>,
    next_handle: u32,
    unknown_handles: bool,
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWriter {
    pub fn new() -> Self {
        let mut out = Vec::with_capacity(256);
        out.put_u16(STREAM_MAGIC);
        out.put_u16(STREAM_VERSION);
        Self {
            out,
            block: Vec::new(),
            next_handle: BASE_HANDLE,
            unknown_handles: false,
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.block.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.block.put_u8(u8::from(value));
    }

    pub fn write_i16(&mut self, value: i16) {
        self.block.put_i16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.block.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.block.put_i64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.block.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.block.put_f64(value);
    }

    pub fn write_utf(&mut self, value: &str) {
        put_utf(&mut self.block, value);
    }

    pub fn field_i32(&mut self, value: i32) {
        self.flush_block();
        self.out.put_i32(value);
    }

    pub fn field_i64(&mut self, value: i64) {
        self.flush_block();
        self.out.put_i64(value);
    }

    pub fn field_f32(&mut self, value: f32) {
        self.flush_block();
        self.out.put_f32(value);
    }

    pub fn field_bool(&mut self, value: bool) {
        self.flush_block();
        self.out.put_u8(u8::from(value));
    }

    pub fn write_null(&mut self) {
        self.flush_block();
        self.out.put_u8(TypeCode::Null.byte());
    }

    pub fn write_reference(&mut self, handle: u32) {
        self.flush_block();
        self.out.put_u8(TypeCode::Reference.byte());
        self.out.put_u32(handle);
    }

    pub fn write_string(&mut self, value: &str) -> u32 {
        self.begin_content();
        let encoded = encode_modified_utf8(value);
        if encoded.len() <= usize::from(u16::MAX) {
            self.out.put_u8(TypeCode::String.byte());
            self.out.put_u16(encoded.len() as u16);
        } else {
            self.out.put_u8(TypeCode::LongString.byte());
            self.out.put_u64(encoded.len() as u64);
        }
        let handle = self.assign_handle();
        self.out.put_slice(&encoded);
        handle
    }

    /// Starts a new object. `classes` lists the object's class first and then
    /// its serializable ancestors. Returns the object's handle; the caller
    /// writes the class data afterwards, topmost ancestor first.
    pub fn begin_object(&mut self, classes: &[ClassSpec<'_>]) -> u32 {
        self.begin_content();
        self.out.put_u8(TypeCode::Object.byte());
        self.write_class_chain(classes);
        self.assign_handle()
    }

    /// Starts an instance of a dynamic proxy class implementing `interfaces`.
    /// `super_chain` describes `java.lang.reflect.Proxy` and anything above it.
    pub fn begin_proxy_object(
        &mut self,
        interfaces: &[&str],
        annotation: Option<&str>,
        super_chain: &[ClassSpec<'_>],
    ) -> u32 {
        self.begin_content();
        self.out.put_u8(TypeCode::Object.byte());
        self.out.put_u8(TypeCode::ProxyClassDesc.byte());
        self.assign_handle();
        self.out.put_i32(interfaces.len() as i32);
        for interface in interfaces {
            put_utf(&mut self.out, interface);
        }
        self.write_annotation(annotation);
        self.write_class_chain(super_chain);
        self.assign_handle()
    }

    /// Starts an array of `len` elements; `class_name` is the JVM array name
    /// such as `[Ljava.lang.String;`.
    pub fn begin_array(&mut self, class_name: &str, len: usize) -> u32 {
        self.begin_content();
        self.out.put_u8(TypeCode::Array.byte());
        self.write_class_chain(&[ClassSpec {
            name: class_name,
            suid: 0,
            flags: SC_SERIALIZABLE,
            fields: &[],
            annotation: None,
        }]);
        let handle = self.assign_handle();
        self.out.put_i32(len as i32);
        handle
    }

    pub fn write_empty_array(&mut self, class_name: &str) -> u32 {
        self.begin_array(class_name, 0)
    }

    /// Terminates custom `writeObject` data.
    pub fn end_block(&mut self) {
        self.flush_block();
        self.out.put_u8(TypeCode::EndBlockData.byte());
    }

    /// Splices a pre-serialized object into the stream. Handles already
    /// assigned are reset first, as the payload numbers its own from the base.
    /// Only valid where a top-level object is expected.
    pub fn write_opaque(&mut self, payload: &Payload) {
        self.flush_block();
        if self.next_handle != BASE_HANDLE {
            self.out.put_u8(TypeCode::Reset.byte());
        }
        self.out.put_slice(payload.object_bytes());
        self.next_handle = BASE_HANDLE;
        self.unknown_handles = true;
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush_block();
        self.out
    }

    fn begin_content(&mut self) {
        self.flush_block();
        if self.unknown_handles {
            self.out.put_u8(TypeCode::Reset.byte());
            self.next_handle = BASE_HANDLE;
            self.unknown_handles = false;
        }
    }

    fn assign_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn write_annotation(&mut self, annotation: Option<&str>) {
        match annotation {
            Some(codebase) => {
                self.write_string(codebase);
            }
            None => self.write_null(),
        }
        self.out.put_u8(TypeCode::EndBlockData.byte());
    }

    fn write_class_chain(&mut self, classes: &[ClassSpec<'_>]) {
        for class in classes {
            self.out.put_u8(TypeCode::ClassDesc.byte());
            put_utf(&mut self.out, class.name);
            self.out.put_i64(class.suid);
            self.assign_handle();
            self.out.put_u8(class.flags);
            self.out.put_i16(class.fields.len() as i16);
            for field in class.fields {
                self.out.put_u8(field.type_code);
                put_utf(&mut self.out, field.name);
                if let Some(class_name) = field.class_name {
                    self.write_string(class_name);
                }
            }
            self.write_annotation(class.annotation);
        }
        self.out.put_u8(TypeCode::Null.byte());
    }

    fn flush_block(&mut self) {
        for chunk in self.block.chunks(MAX_BLOCK) {
            if chunk.len() <= usize::from(u8::MAX) {
                self.out.put_u8(TypeCode::BlockData.byte());
                self.out.put_u8(chunk.len() as u8);
            } else {
                self.out.put_u8(TypeCode::BlockDataLong.byte());
                self.out.put_i32(chunk.len() as i32);
            }
            self.out.put_slice(chunk);
        }
        self.block.clear();
    }
}

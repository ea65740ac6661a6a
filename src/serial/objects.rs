//! The handful of concrete Java objects the client ever has to produce itself.

use super::{ClassSpec, FieldSpec, StreamWriter, SC_SERIALIZABLE, SC_WRITE_METHOD};
use crate::protocol::ObjId;
use crate::util::Payload;

const INTEGER_SUID: i64 = 0x12E2_A0A4_F781_8738;
const NUMBER_SUID: i64 = 0x86AC_951D_0B94_E08B_u64 as i64;
const HASH_MAP_SUID: i64 = 0x0507_DAC1_C316_60D1;
const PROXY_SUID: i64 = -2_222_568_056_686_623_797;
const INVOCATION_HANDLER_SUID: i64 = 2;
const REMOTE_OBJECT_SUID: i64 = -3_215_090_123_894_869_218;
const CODEBASE_CLASS_SUID: i64 = 2;

/// Where a fabricated remote reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefTarget {
    pub host: String,
    pub port: u16,
    pub obj_id: ObjId,
    pub interfaces: Vec<String>,
}

impl RefTarget {
    /// A reference to a listener, implementing only `java.rmi.Remote`.
    pub fn listener(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            obj_id: ObjId::random(),
            interfaces: vec!["java.rmi.Remote".to_owned()],
        }
    }
}

/// A call argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum JavaValue {
    Null,
    String(String),
    Integer(i32),
    EmptyHashMap,
    /// Zero-length array; the name is the JVM array class name.
    EmptyArray(String),
    RemoteRef(RefTarget),
    /// An instance of a class the peer cannot know, annotated with a codebase.
    CodebaseClass {
        class_name: String,
        codebase: Option<String>,
    },
    Opaque(Payload),
}

impl JavaValue {
    pub fn write(&self, out: &mut StreamWriter) {
        match self {
            JavaValue::Null => out.write_null(),
            JavaValue::String(s) => {
                out.write_string(s);
            }
            JavaValue::Integer(value) => {
                let fields = [FieldSpec::primitive(b'I', "value")];
                out.begin_object(&[
                    ClassSpec {
                        name: "java.lang.Integer",
                        suid: INTEGER_SUID,
                        flags: SC_SERIALIZABLE,
                        fields: &fields,
                        annotation: None,
                    },
                    ClassSpec {
                        name: "java.lang.Number",
                        suid: NUMBER_SUID,
                        flags: SC_SERIALIZABLE,
                        fields: &[],
                        annotation: None,
                    },
                ]);
                out.field_i32(*value);
            }
            JavaValue::EmptyHashMap => {
                let fields = [
                    FieldSpec::primitive(b'F', "loadFactor"),
                    FieldSpec::primitive(b'I', "threshold"),
                ];
                out.begin_object(&[ClassSpec {
                    name: "java.util.HashMap",
                    suid: HASH_MAP_SUID,
                    flags: SC_SERIALIZABLE | SC_WRITE_METHOD,
                    fields: &fields,
                    annotation: None,
                }]);
                out.field_f32(0.75);
                out.field_i32(12);
                // buckets, size
                out.write_i32(16);
                out.write_i32(0);
                out.end_block();
            }
            JavaValue::EmptyArray(class_name) => {
                out.write_empty_array(class_name);
            }
            JavaValue::RemoteRef(target) => write_remote_ref(out, target),
            JavaValue::CodebaseClass {
                class_name,
                codebase,
            } => {
                out.begin_object(&[ClassSpec {
                    name: class_name,
                    suid: CODEBASE_CLASS_SUID,
                    flags: SC_SERIALIZABLE,
                    fields: &[],
                    annotation: codebase.as_deref(),
                }]);
            }
            JavaValue::Opaque(payload) => out.write_opaque(payload),
        }
    }
}

fn write_remote_ref(out: &mut StreamWriter, target: &RefTarget) {
    let interfaces: Vec<&str> = target.interfaces.iter().map(String::as_str).collect();
    let proxy_fields = [FieldSpec::object(
        "h",
        "Ljava/lang/reflect/InvocationHandler;",
    )];
    out.begin_proxy_object(
        &interfaces,
        None,
        &[ClassSpec {
            name: "java.lang.reflect.Proxy",
            suid: PROXY_SUID,
            flags: SC_SERIALIZABLE,
            fields: &proxy_fields,
            annotation: None,
        }],
    );
    out.begin_object(&[
        ClassSpec {
            name: "java.rmi.server.RemoteObjectInvocationHandler",
            suid: INVOCATION_HANDLER_SUID,
            flags: SC_SERIALIZABLE,
            fields: &[],
            annotation: None,
        },
        ClassSpec {
            name: "java.rmi.server.RemoteObject",
            suid: REMOTE_OBJECT_SUID,
            flags: SC_SERIALIZABLE | SC_WRITE_METHOD,
            fields: &[],
            annotation: None,
        },
    ]);
    out.write_utf("UnicastRef");
    out.write_utf(&target.host);
    out.write_i32(i32::from(target.port));
    target.obj_id.write(out);
    out.write_bool(false);
    out.end_block();
}

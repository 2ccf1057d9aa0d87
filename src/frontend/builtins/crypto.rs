use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;
use base64::{engine::general_purpose, Engine as _};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::str_arg;

/// Hex-encoded MD5 digest
pub fn create_md5_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(format!("{:x}", md5::compute(str_arg(&args, 0)?))))
    })
}

/// Hex-encoded SHA-256 digest
pub fn create_sha256_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(format!("{:x}", Sha256::digest(str_arg(&args, 0)?))))
    })
}

/// Hex-encoded SHA-512 digest
pub fn create_sha512_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(format!("{:x}", Sha512::digest(str_arg(&args, 0)?))))
    })
}

/// Hex-encoded SHA-1 digest
pub fn create_sha1_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(format!("{:x}", Sha1::digest(str_arg(&args, 0)?))))
    })
}

/// Base64 of the raw SHA-256 digest
pub fn create_base64sha256_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(
            general_purpose::STANDARD.encode(Sha256::digest(str_arg(&args, 0)?)),
        ))
    })
}

pub fn create_base64sha512_func() -> FuncDef {
    FuncDef::builder().param(ParamType::String).build(|args: FuncArgs| {
        Ok(Value::from(
            general_purpose::STANDARD.encode(Sha512::digest(str_arg(&args, 0)?)),
        ))
    })
}

/// A random v4 UUID, different on every call.
pub fn create_uuid_func() -> FuncDef {
    FuncDef::builder().build(|_: FuncArgs| Ok(Value::from(uuid::Uuid::new_v4().to_string())))
}

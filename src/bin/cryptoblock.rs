//! `create`/`split`/`merge`/`validate`/`inspect` over [`ReferenceContext`].
//!
//! Demo tooling only: every invocation shares the same fixed, hard-coded
//! mask so that a hex blob produced by one `create` call can be fed back
//! into a later `split`/`validate`/`inspect` call in a different process.
//! A real deployment's `CryptoContext` would persist keys out of band, not
//! hard-code them into a CLI binary.

use std::process::ExitCode;
use std::sync::Arc;

use cryptoblock::{
    BlockLimits, BlockSerializer, BlockValidator, CryptoContext, EncryptedBlock, EncryptedSize, ReferenceContext,
};

/// Fixed demo mask. Not a secret; this binary has no confidentiality
/// properties to protect.
const DEMO_MASK: i64 = 0x1234_5678;

fn demo_context() -> Arc<dyn CryptoContext> {
    Arc::new(ReferenceContext::deterministic(DEMO_MASK, ReferenceContext::DEFAULT_MODULUS))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    hex::decode(s).map_err(|e| format!("invalid hex: {e}"))
}

fn cmd_create(args: &[String]) -> Result<(), String> {
    let size: i64 = args
        .first()
        .ok_or("usage: cryptoblock create <size>")?
        .parse()
        .map_err(|e| format!("invalid size: {e}"))?;
    let ctx = demo_context();
    let block = EncryptedBlock::create_from_plaintext_size(ctx, size).map_err(|e| e.to_string())?;
    println!("{}", block.debug_info());
    let bytes = BlockSerializer::new().serialize(&block).map_err(|e| e.to_string())?;
    println!("{}", hex::encode(bytes));
    Ok(())
}

fn cmd_inspect(args: &[String]) -> Result<(), String> {
    let bytes = decode_hex(args.first().ok_or("usage: cryptoblock inspect <hex>")?)?;
    let ctx = demo_context();
    let block = BlockSerializer::new()
        .deserialize(ctx, &bytes)
        .map_err(|e| e.to_string())?;
    println!("{}", block.debug_info());
    Ok(())
}

fn cmd_validate(args: &[String]) -> Result<(), String> {
    let bytes = decode_hex(args.first().ok_or("usage: cryptoblock validate <hex>")?)?;
    let ctx = demo_context();
    let block = BlockSerializer::new()
        .deserialize_unchecked(ctx, &bytes, BlockLimits::default())
        .map_err(|e| e.to_string())?;
    let report = BlockValidator::new().comprehensive_validation(&block).map_err(|e| e.to_string())?;
    println!("is_valid: {}", report.is_valid);
    println!("blocks_checked: {}", report.blocks_checked);
    println!("elapsed_microseconds: {}", report.elapsed_microseconds);
    for err in &report.errors {
        println!("error: {err}");
    }
    for warn in &report.warnings {
        println!("warning: {warn}");
    }
    Ok(())
}

fn cmd_split(args: &[String]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("usage: cryptoblock split <hex> <split_size>".into());
    }
    let bytes = decode_hex(&args[0])?;
    let split_size: i64 = args[1].parse().map_err(|e| format!("invalid split_size: {e}"))?;
    let ctx = demo_context();
    let mut block = BlockSerializer::new()
        .deserialize(ctx.clone(), &bytes)
        .map_err(|e| e.to_string())?;
    let split_size_ct = EncryptedSize::new(ctx, split_size).map_err(|e| e.to_string())?;
    let outcome = block
        .split_block(split_size_ct, BlockLimits::default())
        .map_err(|e| e.to_string())?;
    let codec = BlockSerializer::new();
    println!("left:  {}", hex::encode(codec.serialize(&outcome.left).map_err(|e| e.to_string())?));
    println!("right: {}", hex::encode(codec.serialize(&outcome.right).map_err(|e| e.to_string())?));
    Ok(())
}

fn cmd_merge(args: &[String]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("usage: cryptoblock merge <hex1> <hex2>".into());
    }
    let ctx = demo_context();
    let codec = BlockSerializer::new();
    let mut a = codec.deserialize(ctx.clone(), &decode_hex(&args[0])?).map_err(|e| e.to_string())?;
    let mut b = codec.deserialize(ctx, &decode_hex(&args[1])?).map_err(|e| e.to_string())?;
    let merged = EncryptedBlock::merge_blocks(&mut a, &mut b, BlockLimits::default()).map_err(|e| e.to_string())?;
    println!("{}", hex::encode(codec.serialize(&merged).map_err(|e| e.to_string())?));
    Ok(())
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).ok_or(
        "usage: cryptoblock <create|split|merge|validate|inspect> [args...]",
    )?;
    let rest = &args[2.min(args.len())..];
    match command.as_str() {
        "create" => cmd_create(rest),
        "split" => cmd_split(rest),
        "merge" => cmd_merge(rest),
        "validate" => cmd_validate(rest),
        "inspect" => cmd_inspect(rest),
        other => Err(format!("unknown command: {other}")),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

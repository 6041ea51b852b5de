// CLI tool to inspect an incremental base font file.
use std::env;
use std::fs;
use std::process;

use incrfont::{BaseHeader, CmapMapping, expand_base, validate_base};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut raw = false;
    let mut path = None;
    for arg in &args[1..] {
        match arg.as_str() {
            "--raw" => raw = true,
            other => path = Some(other.to_string()),
        }
    }
    let Some(path) = path else {
        eprintln!("Usage: {} [--raw] <base-file>", args[0]);
        eprintln!();
        eprintln!("Display the header prefix and validation report of a base font.");
        eprintln!("Pass --raw when the file is already expanded (e.g. a persisted base).");
        process::exit(1);
    };

    let payload = fs::read(&path)?;
    let header = BaseHeader::parse(&payload)?;

    println!("Base: {}", path);
    println!();
    println!("Header:");
    println!("  header size: {} bytes", header.header_size);
    println!("  outline format: {}", if header.is_ttf { "TrueType (glyf/loca)" } else { "CFF" });
    println!("  glyphs: {}", header.num_glyphs);
    println!("  glyph region at {:#x}, offset array at {:#x} ({} byte entries)",
        header.glyph_offset, header.glyph_data_offset, header.offset_size);
    println!("  hmtx at {:#x} ({} long metrics)", header.hmtx_offset, header.hmetric_count);
    if header.vmtx_offset != 0 {
        println!("  vmtx at {:#x} ({} long metrics)", header.vmtx_offset, header.vmetric_count);
    }
    if let Some(c4) = header.cmap4 {
        println!("  cmap4 at {:#x}, {} bytes, {} compact segment(s)",
            c4.offset, c4.length, header.compact_gos.segments4.len());
    }
    if let Some(c12) = header.cmap12 {
        println!("  cmap12 groups at {:#x}, {} group(s)", c12.offset, c12.n_groups);
    }
    println!("  one char per segment: {}", header.has_one_char_per_seg);

    let mapping = CmapMapping::from_compact(&header.compact_gos);
    println!("  mapped code points: {}", mapping.len());
    println!();

    let expanded = if raw {
        payload
    } else {
        expand_base(&payload, header.header_size)?
    };
    println!("Expanded size: {} bytes", expanded.len());
    println!();
    print!("{}", validate_base(&header, &expanded).summary());
    Ok(())
}

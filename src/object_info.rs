// Inspection of emitted object files. The driver uses this to list what a compiled model
// exports and to print a disassembly listing of one function, and the tests use it to check
// that object output really defines the expected symbols. Symbol sizes are taken from the
// symbol table where the format records them (ELF, COFF) and otherwise measured up to the
// next symbol in the same section (Mach-O). Mach-O's leading underscore is accepted when
// looking a symbol up by its C name.

//! Object file symbols and disassembly.

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, NasmFormatter};
use object::{Architecture, File, Object, ObjectSection, ObjectSymbol, SectionIndex};

use crate::error::{EmitterError, EmitterResult};

/// A symbol defined by an object file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub section: String,
    section_index: SectionIndex,
}

fn parse(bytes: &[u8]) -> EmitterResult<File<'_>> {
    File::parse(bytes).map_err(|e| EmitterError::ParserError(format!("cannot parse object file: {e}")))
}

/// Defined, named symbols sorted by section and address.
pub fn defined_symbols(bytes: &[u8]) -> EmitterResult<Vec<DefinedSymbol>> {
    let file = parse(bytes)?;
    let mut symbols = Vec::new();
    for symbol in file.symbols() {
        if !symbol.is_definition() {
            continue;
        }
        let (Ok(name), Some(section_index)) = (symbol.name(), symbol.section_index()) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let section = file
            .section_by_index(section_index)
            .ok()
            .and_then(|s| s.name().ok().map(str::to_string))
            .unwrap_or_default();
        symbols.push(DefinedSymbol {
            name: name.to_string(),
            address: symbol.address(),
            size: symbol.size(),
            section,
            section_index,
        });
    }
    symbols.sort_by(|a, b| (a.section_index.0, a.address).cmp(&(b.section_index.0, b.address)));

    // Mach-O records no sizes; measure to the next symbol or the end of the section.
    for i in 0..symbols.len() {
        if symbols[i].size != 0 {
            continue;
        }
        let next = symbols[i + 1..]
            .iter()
            .find(|s| s.section_index == symbols[i].section_index && s.address > symbols[i].address)
            .map(|s| s.address);
        let end = match next {
            Some(address) => address,
            None => file
                .section_by_index(symbols[i].section_index)
                .map(|s| s.address() + s.size())
                .unwrap_or(symbols[i].address),
        };
        symbols[i].size = end.saturating_sub(symbols[i].address);
    }
    log::debug!("Object defines {} symbols", symbols.len());
    Ok(symbols)
}

/// Look up `name`, accepting the Mach-O underscore prefix.
pub fn find_symbol(bytes: &[u8], name: &str) -> EmitterResult<DefinedSymbol> {
    let mangled = format!("_{name}");
    defined_symbols(bytes)?
        .into_iter()
        .find(|s| s.name == name || s.name == mangled)
        .ok_or_else(|| EmitterError::FunctionNotFound(format!("{name} is not defined in the object file")))
}

/// NASM-syntax listing of the x86-64 function `name`, one instruction per line.
pub fn disassemble_symbol(bytes: &[u8], name: &str) -> EmitterResult<String> {
    let file = parse(bytes)?;
    if file.architecture() != Architecture::X86_64 {
        return Err(EmitterError::TargetNotSupported(format!(
            "disassembly of {:?} objects",
            file.architecture()
        )));
    }
    let symbol = find_symbol(bytes, name)?;
    let section = file
        .section_by_index(symbol.section_index)
        .map_err(|e| EmitterError::ParserError(e.to_string()))?;
    let data = section.data().map_err(|e| EmitterError::ParserError(e.to_string()))?;
    let start = symbol.address.saturating_sub(section.address()) as usize;
    let end = (start + symbol.size as usize).min(data.len());
    let code = data
        .get(start..end)
        .ok_or_else(|| EmitterError::IndexOutOfRange(format!("{name} lies outside its section")))?;

    let mut decoder = Decoder::with_ip(64, code, symbol.address, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();
    let mut instruction = Instruction::default();
    let mut listing = String::new();
    let mut text = String::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instruction);
        text.clear();
        formatter.format(&instruction, &mut text);
        listing.push_str(&format!("{:08X}  {}\n", instruction.ip(), text));
    }
    Ok(listing)
}

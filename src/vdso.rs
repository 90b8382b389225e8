use goblin::elf::{program_header::PT_LOAD, Elf};

/// The dynamic symbols of a vdso image, held as byte offsets from the
/// start of its mapping.
///
/// The vdso is linked at whatever base the kernel chose for it, so
/// symbol values have to be de-biased by the lowest PT_LOAD vaddr
/// before they can be added to the runtime mapping address.
pub struct VdsoSymbols {
    entries: Vec<(String, usize)>,
}

impl VdsoSymbols {
    pub fn parse(data: &[u8]) -> Result<VdsoSymbols, goblin::error::Error> {
        let elf = Elf::parse(data)?;
        let mut load_min: Option<u64> = None;
        for phdr in &elf.program_headers {
            if phdr.p_type == PT_LOAD {
                load_min = Some(match load_min {
                    Some(m) => m.min(phdr.p_vaddr),
                    None => phdr.p_vaddr,
                });
            }
        }
        let bias = load_min.unwrap_or(0);
        let mut entries = Vec::new();
        for sym in elf.dynsyms.iter() {
            if sym.st_value == 0 {
                continue;
            }
            if let Some(Ok(name)) = elf.dynstrtab.get(sym.st_name) {
                if !name.is_empty() {
                    entries.push((name.to_owned(), (sym.st_value - bias) as usize));
                }
            }
        }
        Ok(VdsoSymbols { entries })
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, offset)| offset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::build_vdso_image;

    #[test]
    fn parses_symbols_with_zero_base() {
        let image = build_vdso_image(
            true,
            62, // EM_X86_64
            0,
            &[0x90; 0x100],
            &[("__vdso_time", 0x210), ("__vdso_gettimeofday", 0x240)],
        );
        let symbols = VdsoSymbols::parse(&image).unwrap();
        assert_eq!(2, symbols.len());
        assert_eq!(Some(0x210), symbols.offset_of("__vdso_time"));
        assert_eq!(Some(0x240), symbols.offset_of("__vdso_gettimeofday"));
        assert_eq!(None, symbols.offset_of("__vdso_getcpu"));
    }

    #[test]
    fn debiases_prelinked_values() {
        // The x86 vdso was historically prelinked at a fixed high
        // address; offsets must come out the same regardless.
        let image = build_vdso_image(
            false,
            3, // EM_386
            0xffff_e000,
            &[0x90; 0x40],
            &[("__kernel_vsyscall", 0x220)],
        );
        let symbols = VdsoSymbols::parse(&image).unwrap();
        assert!(!symbols.is_empty());
        assert_eq!(Some(0x220), symbols.offset_of("__kernel_vsyscall"));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(VdsoSymbols::parse(&[0u8; 64]).is_err());
    }
}

//! # Kernel Boot Information

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Kernel function pointer.
///
/// # ABI
/// System V: the boot-info pointer arrives in `RDI`.
pub type KernelEntryFn = extern "sysv64" fn(*const KernelBootInfo) -> !;

/// Information the kernel needs right after the boot environment hands over.
///
/// Keep this `#[repr(C)]` and use fixed-size integers at the ABI boundary.
/// Every physical range described here that is already in use (direct map,
/// kernel image, framebuffer, ramdisk) must be marked used in the kernel's
/// virtual region allocator before general allocation begins.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Framebuffer information, passed from UEFI GOP.
    pub framebuffer: FramebufferInfo,

    /// Usable physical memory, as an array of inclusive ranges.
    pub memory_map: MemoryMapInfo,

    /// Virtual address at which all physical memory is mapped 1:1.
    pub physical_memory_offset: u64,

    /// Number of bytes covered by the direct map.
    pub physical_memory_size: u64,

    /// Where the kernel image lives.
    pub kernel_image: KernelImageInfo,

    /// Physical address of the PML4 the kernel is running on.
    pub pml4_phys: u64,

    /// Top of the stack the boot environment entered the kernel on.
    pub kernel_stack_top: u64,

    /// RSDP (ACPI 2.0+) physical address, or 0 if not provided.
    pub rsdp_addr: u64,

    /// Initial ramdisk, if any.
    pub ramdisk: RamdiskInfo,

    /// Raw ASCII argument string (not NUL-terminated).
    pub args: ArgsInfo,
}

/// One usable physical range. `physical_end` is the **last** byte, inclusive.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryMapEntry {
    pub physical_start: u64,
    pub physical_end: u64,
}

impl MemoryMapEntry {
    #[must_use]
    pub const fn new(physical_start: u64, physical_end: u64) -> Self {
        Self {
            physical_start,
            physical_end,
        }
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.physical_start)
    }

    /// Last byte of the range.
    #[must_use]
    pub const fn last(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.physical_end)
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.physical_end - self.physical_start + 1
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.physical_end < self.physical_start
    }
}

#[repr(C)]
#[derive(Clone)]
pub struct MemoryMapInfo {
    /// Pointer (in the direct map) to the first [`MemoryMapEntry`].
    pub entries_ptr: u64,
    /// Number of entries.
    pub entry_count: u64,
}

impl MemoryMapInfo {
    /// Views the entries as a slice.
    ///
    /// # Safety
    /// `entries_ptr` must point to `entry_count` initialized entries that stay
    /// valid for `'a`.
    #[allow(unsafe_code, clippy::cast_possible_truncation)]
    #[must_use]
    pub unsafe fn entries<'a>(&self) -> &'a [MemoryMapEntry] {
        if self.entries_ptr == 0 || self.entry_count == 0 {
            return &[];
        }
        unsafe {
            core::slice::from_raw_parts(
                self.entries_ptr as *const MemoryMapEntry,
                self.entry_count as usize,
            )
        }
    }
}

#[repr(C)]
#[derive(Clone)]
pub struct KernelImageInfo {
    pub physical_start: u64,
    /// One past the last byte.
    pub physical_end: u64,
    /// Virtual address of `physical_start`.
    pub virtual_start: u64,
}

impl KernelImageInfo {
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.physical_end - self.physical_start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.physical_end <= self.physical_start
    }

    #[must_use]
    pub const fn virtual_range(&self) -> (VirtualAddress, VirtualAddress) {
        (
            VirtualAddress::new(self.virtual_start),
            VirtualAddress::new(self.virtual_start + self.len()),
        )
    }
}

#[repr(C)]
#[derive(Clone)]
pub struct RamdiskInfo {
    /// Physical address of the ramdisk image, or 0.
    pub physical_start: u64,
    pub size: u64,
}

#[repr(C)]
#[derive(Clone)]
pub struct ArgsInfo {
    /// Pointer (in the direct map) to the argument bytes, or 0.
    pub ptr: u64,
    pub len: u64,
}

impl ArgsInfo {
    /// The argument string, or `""` if absent or not valid UTF-8.
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes that stay valid for `'a`.
    #[allow(unsafe_code)]
    #[must_use]
    pub unsafe fn as_str<'a>(&self) -> &'a str {
        if self.ptr == 0 || self.len == 0 {
            return "";
        }
        #[allow(clippy::cast_possible_truncation)]
        let bytes = unsafe { core::slice::from_raw_parts(self.ptr as *const u8, self.len as usize) };
        core::str::from_utf8(bytes).unwrap_or("")
    }
}

#[repr(C)]
#[derive(Clone)]
pub struct FramebufferInfo {
    /// Linear framebuffer base address (CPU physical address).
    pub framebuffer_ptr: u64,

    /// Total framebuffer size in **bytes**.
    pub framebuffer_size: u64,

    /// Visible width in **pixels**.
    pub framebuffer_width: u64,

    /// Visible height in **pixels**.
    pub framebuffer_height: u64,

    /// Pixels per scanline. May be >= width due to padding.
    pub framebuffer_stride: u64,

    /// Pixel format tag. If `BltOnly`, there is no linear framebuffer.
    pub framebuffer_format: BootPixelFormat,
}

/// Pixel format tag compatible with UEFI GOP.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootPixelFormat {
    Rgb = 0,
    Bgr = 1,
    Bitmask = 2,
    /// No linear framebuffer available.
    BltOnly = 3,
}

impl FramebufferInfo {
    /// Physical byte range of the framebuffer, if there is one.
    #[must_use]
    pub fn physical_range(&self) -> Option<(PhysicalAddress, u64)> {
        if self.framebuffer_format == BootPixelFormat::BltOnly || self.framebuffer_size == 0 {
            return None;
        }
        Some((PhysicalAddress::new(self.framebuffer_ptr), self.framebuffer_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_map_entry_is_inclusive() {
        let e = MemoryMapEntry::new(0x1000, 0x1fff);
        assert_eq!(e.len(), 0x1000);
        assert_eq!(e.last().as_u64(), 0x1fff);
    }

    #[test]
    fn entries_from_raw_parts() {
        let map = [MemoryMapEntry::new(0, 0xffff), MemoryMapEntry::new(0x10_0000, 0x1f_ffff)];
        let info = MemoryMapInfo {
            entries_ptr: map.as_ptr() as u64,
            entry_count: 2,
        };
        #[allow(unsafe_code)]
        let entries = unsafe { info.entries() };
        assert_eq!(entries, &map);
    }

    #[test]
    fn args_string() {
        let raw = b"NoASLR LogLevel=debug";
        let args = ArgsInfo {
            ptr: raw.as_ptr() as u64,
            len: raw.len() as u64,
        };
        #[allow(unsafe_code)]
        let s = unsafe { args.as_str() };
        assert_eq!(s, "NoASLR LogLevel=debug");

        let empty = ArgsInfo { ptr: 0, len: 0 };
        #[allow(unsafe_code)]
        let s = unsafe { empty.as_str() };
        assert!(s.is_empty());
    }

    #[test]
    fn blt_only_has_no_framebuffer_range() {
        let fb = FramebufferInfo {
            framebuffer_ptr: 0x8000_0000,
            framebuffer_size: 4096,
            framebuffer_width: 0,
            framebuffer_height: 0,
            framebuffer_stride: 0,
            framebuffer_format: BootPixelFormat::BltOnly,
        };
        assert!(fb.physical_range().is_none());
    }
}

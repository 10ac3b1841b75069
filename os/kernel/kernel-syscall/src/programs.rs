//! Hand-assembled user programs.
//!
//! Each is position independent and needs nothing but its code page and a
//! stack, so the kernel can map it at any user address and start a thread
//! at offset 0.

/// Prints `byte` and yields, forever.
///
/// ```asm
/// start:
///     mov edi, byte
///     mov eax, 1          ; DebugWrite
///     syscall
///     mov eax, 2          ; Yield
///     syscall
///     jmp start
/// ```
#[rustfmt::skip]
#[must_use]
pub const fn print_loop(byte: u8) -> [u8; 21] {
    [
        0xbf, byte, 0x00, 0x00, 0x00,       // mov edi, byte
        0xb8, 0x01, 0x00, 0x00, 0x00,       // mov eax, 1
        0x0f, 0x05,                         // syscall
        0xb8, 0x02, 0x00, 0x00, 0x00,       // mov eax, 2
        0x0f, 0x05,                         // syscall
        0xeb, 0xeb,                         // jmp start
    ]
}

/// Prints `byte` once, then terminates. Traps with `#UD` should the
/// terminate call ever return.
///
/// ```asm
///     mov edi, byte
///     mov eax, 1          ; DebugWrite
///     syscall
///     xor eax, eax        ; Terminate
///     syscall
///     ud2
/// ```
#[rustfmt::skip]
#[must_use]
pub const fn print_once(byte: u8) -> [u8; 18] {
    [
        0xbf, byte, 0x00, 0x00, 0x00,       // mov edi, byte
        0xb8, 0x01, 0x00, 0x00, 0x00,       // mov eax, 1
        0x0f, 0x05,                         // syscall
        0x31, 0xc0,                         // xor eax, eax
        0x0f, 0x05,                         // syscall
        0x0f, 0x0b,                         // ud2
    ]
}

/// Executes an undefined instruction. The kernel terminates the process.
pub static INVALID_OPCODE: [u8; 2] = [0x0f, 0x0b];

/// Calls an unassigned syscall number, prints the low byte of the result
/// (`0xff`), then terminates.
///
/// ```asm
///     mov eax, 7
///     syscall
///     mov rdi, rax
///     mov eax, 1          ; DebugWrite
///     syscall
///     xor eax, eax        ; Terminate
///     syscall
/// ```
#[rustfmt::skip]
pub static BAD_SYSCALL: [u8; 21] = [
    0xb8, 0x07, 0x00, 0x00, 0x00,           // mov eax, 7
    0x0f, 0x05,                             // syscall
    0x48, 0x89, 0xc7,                       // mov rdi, rax
    0xb8, 0x01, 0x00, 0x00, 0x00,           // mov eax, 1
    0x0f, 0x05,                             // syscall
    0x31, 0xc0,                             // xor eax, eax
    0x0f, 0x05,                             // syscall
];

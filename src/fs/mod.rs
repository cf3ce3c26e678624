//! In-kernel filesystem providers, each exposed as a directory descriptor in
//! the initial table: bootfs (embedded binaries), initrdfs (cpio archive
//! from a boot module), procfs, the terminal store and the interface store
//! service socket.

pub mod bootfs;
pub mod ifstore;
pub mod initrdfs;
pub mod procfs;
pub mod termstore;

use multiboot2::BootInformation;

// Device ids of the kernel-provided filesystems. Userspace-served
// filesystems hand out their own ids above these.
pub const PROCFS_DEVICE: u64 = 1;
pub const BOOTFS_DEVICE: u64 = 2;
pub const INITRDFS_DEVICE: u64 = 3;
pub const TERMSTORE_DEVICE: u64 = 4;
pub const SHMFS_DEVICE: u64 = 5;

pub fn init(boot_info: &BootInformation<'_>) {
    for module in boot_info.module_tags() {
        let name = module.cmdline().unwrap_or("");
        let start = crate::mm::phys_to_kernel(module.start_address() as usize) as *const u8;
        let len = (module.end_address() - module.start_address()) as usize;
        let data = unsafe { core::slice::from_raw_parts(start, len) };

        if name == "initrd" {
            initrdfs::load(data);
        } else if !name.is_empty() {
            bootfs::register(name, data);
        }
    }
    crate::kinfo!(
        "[fs] bootfs: {} binaries, initrd: {} files",
        bootfs::count(),
        initrdfs::count()
    );
}

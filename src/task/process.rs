//! The process: an address space, a mapping list, a descriptor table, a
//! thread list and an exit state, reachable from other processes through
//! process descriptors.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use spin::{Mutex, Once};

use super::thread::Thread;
use super::userlock::{CondvarWaiters, LockWaiters};
use crate::abi::types::{self, ExitCode, Fd, MProt, MsFlags, Signal, Tid};
use crate::abi::{Errno, Rights};
use crate::fd::{FdHandle, FdSlot};
use crate::mm::mapping::{AddressSpace, MemMapping};
use crate::mm::{PAGE_SIZE};
use crate::sync::{ConditionData, ReadyResult, Signaler};

/// Lowest address tried when the kernel picks a mapping address itself.
const MMAP_SEARCH_BASE: u32 = 0x9000_0000;

static PROCESSES: Mutex<Vec<Weak<Process>>> = Mutex::new(Vec::new());
static INIT_PROCESS: Once<Arc<Process>> = Once::new();

pub fn set_init(process: &Arc<Process>) {
    INIT_PROCESS.call_once(|| Arc::clone(process));
}

fn is_init(process: &Process) -> bool {
    INIT_PROCESS
        .get()
        .map_or(false, |init| core::ptr::eq(init.as_ref() as *const _, process as *const _))
}

pub fn all_processes() -> Vec<Arc<Process>> {
    let mut list = PROCESSES.lock();
    list.retain(|w| w.strong_count() > 0);
    list.iter().filter_map(|w| w.upgrade()).collect()
}

pub struct Process {
    name: Mutex<String>,
    /// 16 random bytes in UUIDv4 layout, chosen at exec.
    pid: Mutex<[u8; 16]>,

    pub(crate) space: Mutex<AddressSpace>,
    pub(crate) mappings: Mutex<Vec<MemMapping>>,

    pub(crate) fds: Mutex<Vec<Option<FdSlot>>>,

    threads: Mutex<Vec<Arc<Thread>>>,
    last_tid: AtomicU32,

    running: AtomicBool,
    exitcode: AtomicU32,
    exitsignal: AtomicU8,
    termination_signaler: Arc<Signaler>,

    pub(crate) userland_locks: Mutex<BTreeMap<u32, LockWaiters>>,
    pub(crate) userland_condvars: Mutex<BTreeMap<u32, CondvarWaiters>>,
}

impl Process {
    pub fn new(name: &str) -> Result<Arc<Process>, Errno> {
        let process = Arc::new(Process {
            name: Mutex::new(String::from(name)),
            pid: Mutex::new([0; 16]),
            space: Mutex::new(AddressSpace::new()?),
            mappings: Mutex::new(Vec::new()),
            fds: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            last_tid: AtomicU32::new(types::MAIN_THREAD - 1),
            running: AtomicBool::new(false),
            exitcode: AtomicU32::new(0),
            exitsignal: AtomicU8::new(0),
            termination_signaler: Signaler::new(),
            userland_locks: Mutex::new(BTreeMap::new()),
            userland_condvars: Mutex::new(BTreeMap::new()),
        });

        // A poll on an already-exited process must not block.
        let weak = Arc::downgrade(&process);
        process.termination_signaler.set_ready_check(Arc::new(move || {
            match weak.upgrade() {
                Some(p) if !p.is_running() => ReadyResult::Ready(Some(ConditionData::ProcTerminate {
                    exitcode: p.exitcode.load(Ordering::Relaxed),
                    signal: p.exitsignal.load(Ordering::Relaxed),
                })),
                Some(_) => ReadyResult::Pending,
                None => ReadyResult::Ready(None),
            }
        }));

        PROCESSES.lock().push(Arc::downgrade(&process));
        Ok(process)
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = String::from(name);
    }

    pub fn pid_bytes(&self) -> [u8; 16] {
        *self.pid.lock()
    }

    pub fn pid_hex(&self) -> String {
        use core::fmt::Write;
        let mut s = String::new();
        for b in self.pid_bytes() {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    pub(crate) fn choose_pid(&self) {
        let mut pid = [0u8; 16];
        crate::random::fill(&mut pid);
        // UUIDv4 variant and version bits.
        pid[6] = (pid[6] & 0x0f) | 0x40;
        pid[8] = (pid[8] & 0x3f) | 0x80;
        *self.pid.lock() = pid;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }

    pub fn install_address_space(&self) {
        self.space.lock().install();
    }

    pub fn termination_signaler(&self) -> Arc<Signaler> {
        Arc::clone(&self.termination_signaler)
    }

    /// Exit state, if the process has terminated.
    pub fn terminated(&self) -> Option<(ExitCode, Signal)> {
        if self.is_running() {
            None
        } else {
            Some((
                self.exitcode.load(Ordering::Relaxed),
                self.exitsignal.load(Ordering::Relaxed),
            ))
        }
    }

    // --- descriptor table -------------------------------------------------

    /// Install a descriptor in the lowest free slot.
    pub fn add_fd(&self, fd: FdHandle, rights_base: Rights, rights_inheriting: Rights) -> Fd {
        let slot = FdSlot {
            fd,
            rights_base,
            rights_inheriting,
        };
        let mut fds = self.fds.lock();
        for (i, entry) in fds.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(slot);
                return i as Fd;
            }
        }
        fds.push(Some(slot));
        (fds.len() - 1) as Fd
    }

    /// Look up a descriptor, demanding `needed` rights.
    pub fn get_fd(&self, num: Fd, needed: Rights) -> Result<FdSlot, Errno> {
        let fds = self.fds.lock();
        let slot = fds
            .get(num as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::BadF)?;
        if !slot.rights_base.contains(needed) {
            return Err(Errno::NotCapable);
        }
        Ok(slot.clone())
    }

    pub fn close_fd(&self, num: Fd) -> Result<(), Errno> {
        let mut fds = self.fds.lock();
        let slot = fds.get_mut(num as usize).ok_or(Errno::BadF)?;
        if slot.is_none() {
            return Err(Errno::BadF);
        }
        *slot = None;
        Ok(())
    }

    pub fn replace_fd(
        &self,
        num: Fd,
        fd: FdHandle,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> Result<(), Errno> {
        let mut fds = self.fds.lock();
        let slot = fds.get_mut(num as usize).ok_or(Errno::BadF)?;
        if slot.is_none() {
            return Err(Errno::BadF);
        }
        *slot = Some(FdSlot {
            fd,
            rights_base,
            rights_inheriting,
        });
        Ok(())
    }

    fn fd_table_snapshot(&self) -> Vec<Option<FdSlot>> {
        self.fds.lock().clone()
    }

    /// The descriptors every process is born with.
    pub fn add_initial_fds(&self) -> Result<(), Errno> {
        self.add_fd(
            crate::fd::vga_fd::VgaFd::new(),
            Rights::FD_WRITE | Rights::FILE_STAT_FGET,
            Rights::NONE,
        );

        self.add_fd(
            crate::fd::memory_fd::MemoryFd::with_bytes(
                b"These are the contents of my buffer!\n",
                "memory_fd",
            ),
            Rights::FD_READ,
            Rights::NONE,
        );

        self.add_fd(
            crate::fs::procfs::root_fd(),
            Rights::FILE_OPEN | Rights::FILE_STAT_FGET,
            Rights::FD_READ
                | Rights::FD_WRITE
                | Rights::FD_SEEK
                | Rights::FD_TELL
                | Rights::FILE_OPEN
                | Rights::FILE_STAT_FGET
                | Rights::FILE_STAT_GET,
        );

        self.add_fd(
            crate::fs::bootfs::root_fd(),
            Rights::FILE_OPEN | Rights::FILE_STAT_FGET,
            Rights::FD_READ
                | Rights::FD_SEEK
                | Rights::FD_TELL
                | Rights::FILE_OPEN
                | Rights::FILE_STAT_FGET
                | Rights::FILE_STAT_GET
                | Rights::PROC_EXEC,
        );

        self.add_fd(
            crate::fs::initrdfs::root_fd(),
            Rights::FILE_OPEN | Rights::FILE_READDIR | Rights::FILE_STAT_FGET | Rights::FILE_STAT_GET,
            Rights::FD_READ
                | Rights::FD_SEEK
                | Rights::FD_TELL
                | Rights::FILE_OPEN
                | Rights::FILE_READDIR
                | Rights::FILE_STAT_FGET
                | Rights::FILE_STAT_GET
                | Rights::PROC_EXEC,
        );

        self.add_fd(crate::fs::ifstore::socket_fd()?, Rights::ALL, Rights::ALL);

        self.add_fd(
            crate::fs::termstore::root_fd(),
            Rights::FILE_OPEN | Rights::FILE_READDIR | Rights::FILE_STAT_FGET | Rights::FILE_STAT_GET,
            Rights::FD_READ | Rights::FD_SEEK | Rights::FD_WRITE,
        );

        Ok(())
    }

    // --- memory mappings --------------------------------------------------

    /// Register a mapping. With `overwrite` the target range is unmapped
    /// first; otherwise an overlap is a kernel bug.
    pub fn add_mem_mapping(&self, mapping: MemMapping, overwrite: bool) {
        if overwrite {
            self.mem_unmap(mapping.virtual_address, mapping.number_of_pages);
        }
        let mut mappings = self.mappings.lock();
        for existing in mappings.iter() {
            let overlaps = mapping.virtual_address
                < existing.virtual_address + (existing.number_of_pages * PAGE_SIZE) as u32
                && existing.virtual_address
                    < mapping.virtual_address + (mapping.number_of_pages * PAGE_SIZE) as u32;
            assert!(
                !overlaps,
                "new mapping overlaps an existing one at {:#x}",
                existing.virtual_address
            );
        }
        mappings.push(mapping);
    }

    /// Split mappings so that no mapping straddles either end of the range.
    fn split_mappings_at_range(&self, begin: u32, num_pages: usize) {
        let end = begin + (num_pages * PAGE_SIZE) as u32;
        let mut mappings = self.mappings.lock();
        let mut new_parts: Vec<MemMapping> = Vec::new();
        for m in mappings.iter_mut() {
            let m_begin = m.virtual_address;
            let m_end = m_begin + (m.number_of_pages * PAGE_SIZE) as u32;
            if end <= m_begin || begin >= m_end {
                continue;
            }
            if begin > m_begin {
                let keep_pages = ((begin - m_begin) as usize) / PAGE_SIZE;
                // m keeps the high part; the returned left part survives.
                new_parts.push(m.split_at(keep_pages, true));
            }
            if end < m.virtual_address + (m.number_of_pages * PAGE_SIZE) as u32 {
                let inside_pages = ((end - m.virtual_address) as usize) / PAGE_SIZE;
                // m keeps the part inside the range.
                new_parts.push(m.split_at(inside_pages, false));
            }
        }
        mappings.extend(new_parts);
    }

    /// Unmap everything overlapping the range. Afterwards no mapping
    /// overlaps `[addr, addr + num_pages * 4K)`.
    pub fn mem_unmap(&self, addr: u32, num_pages: usize) {
        if num_pages == 0 {
            return;
        }
        self.split_mappings_at_range(addr, num_pages);
        let end = addr + (num_pages * PAGE_SIZE) as u32;

        let space = self.space.lock();
        let mut mappings = self.mappings.lock();
        mappings.retain(|m| {
            let m_begin = m.virtual_address;
            let m_end = m_begin + (m.number_of_pages * PAGE_SIZE) as u32;
            if end <= m_begin || addr >= m_end {
                return true;
            }
            assert!(
                addr <= m_begin && end >= m_end,
                "partial mappings should have been split"
            );
            m.unmap_completely(&space);
            false
        });
    }

    pub fn mem_protect(&self, addr: u32, num_pages: usize, prot: MProt) {
        self.split_mappings_at_range(addr, num_pages);
        let end = addr + (num_pages * PAGE_SIZE) as u32;
        let space = self.space.lock();
        let mut mappings = self.mappings.lock();
        for m in mappings.iter_mut() {
            let m_begin = m.virtual_address;
            let m_end = m_begin + (m.number_of_pages * PAGE_SIZE) as u32;
            if end <= m_begin || addr >= m_end {
                continue;
            }
            m.set_protection(&space, prot);
        }
    }

    pub fn mem_sync(&self, addr: u32, num_pages: usize, flags: MsFlags) -> Result<(), Errno> {
        let end = addr + (num_pages * PAGE_SIZE) as u32;
        let space = self.space.lock();
        let mappings = self.mappings.lock();
        for m in mappings.iter() {
            let m_begin = m.virtual_address;
            let m_end = m_begin + (m.number_of_pages * PAGE_SIZE) as u32;
            if end <= m_begin || addr >= m_end {
                continue;
            }
            let first = if addr > m_begin {
                ((addr - m_begin) as usize) / PAGE_SIZE
            } else {
                0
            };
            let last = if end < m_end {
                ((end - m_begin) as usize) / PAGE_SIZE
            } else {
                m.number_of_pages
            };
            for page in first..last {
                m.sync(&space, page, flags)?;
            }
        }
        Ok(())
    }

    pub fn mem_advise(&self, addr: u32, num_pages: usize, advice: u8) {
        let end = addr + (num_pages * PAGE_SIZE) as u32;
        let mut mappings = self.mappings.lock();
        for m in mappings.iter_mut() {
            let m_begin = m.virtual_address;
            let m_end = m_begin + (m.number_of_pages * PAGE_SIZE) as u32;
            if end > m_begin && addr < m_end {
                m.advice = advice;
            }
        }
    }

    /// Demand paging: back the faulting page if the mapping and requested
    /// access allow it. A fault on an already-backed page is fatal (no
    /// copy-on-write yet).
    pub fn handle_pagefault(&self, addr: u32, for_writing: bool, for_exec: bool) -> bool {
        let mut space = self.space.lock();
        let mappings = self.mappings.lock();
        let mut hit: Option<(&MemMapping, usize)> = None;
        for m in mappings.iter() {
            if let Some(page) = m.page_num(addr) {
                assert!(hit.is_none(), "overlapping mappings");
                hit = Some((m, page));
            }
        }
        let (mapping, page) = match hit {
            Some(h) => h,
            None => return false,
        };
        if for_writing && mapping.protection & types::PROT_WRITE == 0 {
            return false;
        }
        if for_exec && mapping.protection & types::PROT_EXEC == 0 {
            return false;
        }
        if mapping.is_backed(&space, page) {
            // Present page, allowed access, still faulted: protection
            // mismatch the mapping cannot explain.
            return false;
        }
        mapping.ensure_backed(&mut space, page).is_ok()
    }

    /// Lowest free gap of `num_pages`, searching upwards from the mmap base.
    pub fn find_free_virtual_range(&self, num_pages: usize) -> Option<u32> {
        let mappings = self.mappings.lock();
        let mut address = MMAP_SEARCH_BASE;
        let len = (num_pages * PAGE_SIZE) as u64;
        while (address as u64 + len) <= crate::mm::KERNEL_VIRTUAL_BASE as u64 {
            let mut lowest: Option<(u32, usize)> = None;
            for m in mappings.iter() {
                let m_end = m.virtual_address + (m.number_of_pages * PAGE_SIZE) as u32;
                if m_end > address {
                    match lowest {
                        Some((addr, _)) if m.virtual_address >= addr => {}
                        _ => lowest = Some((m.virtual_address, m.number_of_pages)),
                    }
                }
            }
            match lowest {
                None => return Some(address),
                Some((m_addr, m_pages)) => {
                    if address as u64 + len <= m_addr as u64 {
                        return Some(address);
                    }
                    address = m_addr + (m_pages * PAGE_SIZE) as u32;
                }
            }
        }
        None
    }

    // --- threads ----------------------------------------------------------

    pub(crate) fn next_tid(&self) -> Tid {
        self.last_tid.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_thread(self: &Arc<Process>, thread: Arc<Thread>) {
        self.threads.lock().push(Arc::clone(&thread));
        crate::sched::thread_ready(thread);
    }

    /// Create and queue a thread at `entrypoint` (thread_create syscall and
    /// exec's main thread).
    pub fn spawn_thread(
        self: &Arc<Process>,
        stack_bottom: u32,
        stack_len: u32,
        auxv: u32,
        entrypoint: u32,
    ) -> Result<Arc<Thread>, Errno> {
        assert!(self.is_running());
        let tid = self.next_tid();
        let thread = Thread::new(Arc::clone(self), stack_bottom, stack_len, auxv, entrypoint, tid)?;
        self.add_thread(Arc::clone(&thread));
        Ok(thread)
    }

    pub fn remove_thread(&self, thread: &Arc<Thread>) {
        let mut threads = self.threads.lock();
        let before = threads.len();
        threads.retain(|t| !Arc::ptr_eq(t, thread));
        assert_eq!(before, threads.len() + 1, "thread not on its process");
    }

    pub(crate) fn exit_all_threads(&self) {
        let threads: Vec<Arc<Thread>> = self.threads.lock().clone();
        for thread in threads {
            assert!(!thread.is_exited());
            thread.exit();
        }
        assert!(self.threads.lock().is_empty());
        self.last_tid
            .store(types::MAIN_THREAD - 1, Ordering::Relaxed);
    }

    // --- lifecycle --------------------------------------------------------

    pub fn fork(self: &Arc<Process>, calling_thread: &Arc<Thread>) -> Result<Arc<Process>, Errno> {
        assert!(self.is_running());

        let name = self.name() + "->forked";
        let child = Process::new(&name)?;
        // The pid is chosen at exec; until then the child reports the
        // parent's (its memory, auxv included, is a copy anyway).
        *child.pid.lock() = self.pid_bytes();
        child.set_running(true);

        // The thread constructor snapshots the saved state, so the child
        // return values are patched in first and restored right after.
        let saved = calling_thread.with_state(|st| {
            let saved = (st.eax, st.edx, st.eflags);
            st.eax = types::PROCESS_CHILD;
            st.edx = types::MAIN_THREAD;
            st.eflags &= !crate::arch::EFLAGS_CARRY;
            saved
        });
        let main_thread = Thread::forked(Arc::clone(&child), calling_thread);
        calling_thread.with_state(|st| {
            st.eax = saved.0;
            st.edx = saved.1;
            st.eflags = saved.2;
        });
        let main_thread = main_thread?;

        *child.fds.lock() = self.fd_table_snapshot();

        {
            let parent_space = self.space.lock();
            let mut child_space = child.space.lock();
            let parent_mappings = self.mappings.lock();
            let mut child_mappings = child.mappings.lock();
            for m in parent_mappings.iter() {
                let sibling = MemMapping::new(
                    m.virtual_address,
                    m.number_of_pages,
                    m.backing.clone(),
                    m.protection,
                    m.shared,
                );
                sibling.copy_from(&mut child_space, m, &parent_space)?;
                child_mappings.push(sibling);
            }
        }

        child.add_thread(main_thread);
        Ok(child)
    }

    /// Terminate the process: record the exit state, wake every poll on our
    /// process descriptors, drop all descriptors and unschedule all threads.
    /// A process exits at most once; later calls are ignored.
    pub fn exit(&self, exitcode: ExitCode, exitsignal: Signal) {
        if is_init(self) {
            panic!(
                "init exited with signal {}, exit code {}",
                exitsignal, exitcode
            );
        }
        if !self.is_running() {
            return;
        }
        self.set_running(false);
        self.exitsignal.store(exitsignal, Ordering::Relaxed);
        self.exitcode.store(
            if exitsignal == 0 { exitcode } else { 0 },
            Ordering::Relaxed,
        );

        crate::kinfo!(
            "process \"{}\" exited with signal {}, code {}",
            self.name(),
            exitsignal,
            self.exitcode.load(Ordering::Relaxed)
        );

        let exitcode = self.exitcode.load(Ordering::Relaxed);
        self.termination_signaler.broadcast_with(|| {
            Some(ConditionData::ProcTerminate {
                exitcode,
                signal: exitsignal,
            })
        });

        self.fds.lock().clear();
        self.exit_all_threads();

        // Mappings and page tables are torn down when the last process
        // descriptor drops the process.
    }

    pub fn deliver_signal(&self, signal: Signal) {
        if types::signal_terminates(signal) {
            self.exit(0, signal);
        }
        // CloudABI cannot install handlers; everything else is ignored.
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let space = self.space.get_mut();
        for m in self.mappings.get_mut().drain(..) {
            m.unmap_completely(space);
        }
    }
}

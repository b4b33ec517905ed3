//! Fastmem: guest memory accesses lowered to direct host loads/stores,
//! recovered through the SIGSEGV handler.
//!
//! Every fastmem site is registered in a process-wide table keyed by its
//! host address. When a direct access faults, the handler rewrites the
//! site to jump to its out-of-line fallback (which calls the memory
//! callback), records the site as demoted, queues the owning block for
//! invalidation, and resumes at the rewritten site. A site demotes at
//! most once; recompilation consults the demotion set and never uses
//! fastmem there again.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, Once, OnceLock};

use iced_x86::code_asm::CodeLabel;

use crate::ir::location::LocationDescriptor;

/// Per-instance fastmem settings.
#[derive(Debug, Clone, Copy)]
pub struct FastmemConfig {
    /// Host address such that guest address `v` maps to `base + v`.
    pub base: u64,
}

/// A fastmem site recorded during emission, before label resolution.
pub struct PendingFastmemSite {
    pub site: CodeLabel,
    pub site_end: CodeLabel,
    pub fallback: CodeLabel,
    pub location: LocationDescriptor,
    pub inst_offset: u32,
}

/// A registered site with resolved host addresses.
#[derive(Debug, Clone, Copy)]
pub struct FastmemSite {
    pub owner: OwnerId,
    pub site: u64,
    pub site_len: u32,
    pub fallback: u64,
    pub location: LocationDescriptor,
    pub inst_offset: u32,
}

/// Identifies one JIT instance in the process-wide registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    pub fn next() -> OwnerId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        OwnerId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct Registry {
    /// site address -> site info.
    sites: HashMap<u64, FastmemSite>,
    /// Demoted `(owner, location, inst offset)` triples.
    demoted: HashSet<(OwnerId, u64, u32)>,
    /// Blocks awaiting invalidation after a demotion.
    pending_invalidation: HashMap<OwnerId, Vec<LocationDescriptor>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

pub fn register_sites(sites: Vec<FastmemSite>) {
    if sites.is_empty() {
        return;
    }
    let mut reg = registry().lock().unwrap();
    for site in sites {
        reg.sites.insert(site.site, site);
    }
}

/// Drop every registration belonging to `owner` whose block was removed.
pub fn unregister_blocks(owner: OwnerId, locations: &[LocationDescriptor]) {
    let mut reg = registry().lock().unwrap();
    reg.sites
        .retain(|_, s| s.owner != owner || !locations.contains(&s.location));
}

pub fn unregister_owner(owner: OwnerId) {
    let mut reg = registry().lock().unwrap();
    reg.sites.retain(|_, s| s.owner != owner);
    reg.pending_invalidation.remove(&owner);
}

/// Whether a previous fault demoted this site.
pub fn is_demoted(owner: OwnerId, location: LocationDescriptor, inst_offset: u32) -> bool {
    let reg = registry().lock().unwrap();
    reg.demoted.contains(&(owner, location.value(), inst_offset))
}

/// Blocks that must be recompiled without fastmem. Drained by the owner
/// on its next block lookup.
pub fn take_pending_invalidations(owner: OwnerId) -> Vec<LocationDescriptor> {
    let mut reg = registry().lock().unwrap();
    reg.pending_invalidation.remove(&owner).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// The fault handler
// ---------------------------------------------------------------------------

/// Install the process-wide SIGSEGV handler. Idempotent.
pub fn install_exception_handler() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = fault_handler as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut action.sa_mask);
        let mut previous: libc::sigaction = std::mem::zeroed();
        libc::sigaction(libc::SIGSEGV, &action, &mut previous);
        PREVIOUS_HANDLER = Some(previous);
    });
}

static mut PREVIOUS_HANDLER: Option<libc::sigaction> = None;

/// Rewrite a faulted site to jump to its fallback and bookkeep the
/// demotion. Runs with the faulting thread stopped inside the handler;
/// compilation never runs concurrently with guest execution of the same
/// instance, so taking the registry lock here cannot deadlock against
/// the owner.
unsafe extern "C" fn fault_handler(
    signum: libc::c_int,
    info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    let ucontext = unsafe { &mut *(context as *mut libc::ucontext_t) };
    let rip = unsafe { ucontext.uc_mcontext.gregs[libc::REG_RIP as usize] } as u64;

    let site = {
        let reg = registry().lock().unwrap();
        reg.sites.get(&rip).copied()
    };

    if let Some(site) = site {
        unsafe { patch_site_to_fallback(&site) };
        let mut reg = registry().lock().unwrap();
        reg.demoted
            .insert((site.owner, site.location.value(), site.inst_offset));
        reg.pending_invalidation
            .entry(site.owner)
            .or_default()
            .push(site.location);
        reg.sites.remove(&rip);
        // Resume at the rewritten site: it now jumps to the fallback.
        return;
    }

    // Not ours: hand the fault to whoever was installed before us.
    unsafe {
        let previous = {
            let ptr = std::ptr::addr_of!(PREVIOUS_HANDLER);
            (*ptr).as_ref().copied()
        };
        match previous {
            Some(prev) if prev.sa_sigaction != libc::SIG_DFL && prev.sa_sigaction != libc::SIG_IGN => {
                if prev.sa_flags & libc::SA_SIGINFO != 0 {
                    let f: unsafe extern "C" fn(
                        libc::c_int,
                        *mut libc::siginfo_t,
                        *mut libc::c_void,
                    ) = std::mem::transmute(prev.sa_sigaction);
                    f(signum, info, context);
                } else {
                    let f: unsafe extern "C" fn(libc::c_int) =
                        std::mem::transmute(prev.sa_sigaction);
                    f(signum);
                }
            }
            _ => {
                // Restore the default action; the re-raised fault kills
                // the process with the expected signal.
                let mut dfl: libc::sigaction = std::mem::zeroed();
                dfl.sa_sigaction = libc::SIG_DFL;
                libc::sigaction(libc::SIGSEGV, &dfl, std::ptr::null_mut());
            }
        }
    }
}

/// Overwrite the site with `jmp rel32 fallback`, NOP-filling the rest.
unsafe fn patch_site_to_fallback(site: &FastmemSite) {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
    let start = site.site & !(page_size - 1);
    let end = (site.site + site.site_len as u64 + page_size - 1) & !(page_size - 1);

    unsafe {
        libc::mprotect(
            start as *mut libc::c_void,
            (end - start) as usize,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        );
    }

    let disp = site.fallback.wrapping_sub(site.site + 5) as i64;
    debug_assert!((i32::MIN as i64..=i32::MAX as i64).contains(&disp));
    let ptr = site.site as *mut u8;
    unsafe {
        ptr.write(0xE9);
        (ptr.add(1) as *mut i32).write_unaligned(disp as i32);
        for i in 5..site.site_len as usize {
            ptr.add(i).write(0x90);
        }
        libc::mprotect(
            start as *mut libc::c_void,
            (end - start) as usize,
            libc::PROT_READ | libc::PROT_EXEC,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demotion_bookkeeping() {
        let owner = OwnerId::next();
        let loc = LocationDescriptor::new(0x1000);
        assert!(!is_demoted(owner, loc, 3));
        {
            let mut reg = registry().lock().unwrap();
            reg.demoted.insert((owner, loc.value(), 3));
            reg.pending_invalidation.entry(owner).or_default().push(loc);
        }
        assert!(is_demoted(owner, loc, 3));
        assert!(!is_demoted(owner, loc, 4));
        assert_eq!(take_pending_invalidations(owner), vec![loc]);
        assert!(take_pending_invalidations(owner).is_empty());
    }

    #[test]
    fn site_registration_round_trip() {
        let owner = OwnerId::next();
        let loc = LocationDescriptor::new(0x2000);
        register_sites(vec![FastmemSite {
            owner,
            site: 0xAAAA_0000,
            site_len: 8,
            fallback: 0xAAAA_0040,
            location: loc,
            inst_offset: 1,
        }]);
        {
            let reg = registry().lock().unwrap();
            assert!(reg.sites.contains_key(&0xAAAA_0000));
        }
        unregister_blocks(owner, &[loc]);
        {
            let reg = registry().lock().unwrap();
            assert!(!reg.sites.contains_key(&0xAAAA_0000));
        }
    }
}

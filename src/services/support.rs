//! Lookup and listing helpers shared by the reconcilers.

use crate::error::{ApiError, ReconcileError};
use crate::models::platform::{PageRequest, Resource};
use crate::remote::MetadataApi;
use log::{debug, warn};

/// Outcome of an idempotent ensure or upsert step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured<T> {
    Created(T),
    /// Already present and left as is.
    Reused(T),
    /// Already present; its content was overwritten.
    Updated(T),
}

impl<T> Ensured<T> {
    pub fn value(&self) -> &T {
        match self {
            Ensured::Created(v) | Ensured::Reused(v) | Ensured::Updated(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Ensured::Created(v) | Ensured::Reused(v) | Ensured::Updated(v) => v,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Ensured<U> {
        match self {
            Ensured::Created(v) => Ensured::Created(f(v)),
            Ensured::Reused(v) => Ensured::Reused(f(v)),
            Ensured::Updated(v) => Ensured::Updated(f(v)),
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Ensured::Created(_) => "created",
            Ensured::Reused(_) => "reused",
            Ensured::Updated(_) => "updated",
        }
    }
}

/// `<kind label> <name>`, the resource tag carried by reconcile errors.
pub fn describe<R: Resource>(name: &str) -> String {
    format!("{} {}", R::KIND.label(), name)
}

/// First resource named `name`. Surplus matches are an anomaly: logged, never acted upon.
pub fn first_match<R: Resource, A: MetadataApi>(api: &A, name: &str) -> Result<Option<R>, ApiError> {
    let mut found = api.find_by_name::<R>(name)?;
    if found.len() > 1 {
        let ids = found.iter().map(|r| r.id().to_string()).collect::<Vec<_>>().join(", ");
        warn!(
            "{} matches for {}; using the first of [{}]",
            found.len(),
            describe::<R>(name),
            ids
        );
    }
    Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
}

/// Looks `name` up and calls `create` only when absent. A Conflict from `create` means someone else
/// created it in between, so the lookup is repeated and its result reused.
pub fn create_or_reuse<R, A, F>(api: &A, name: &str, create: F) -> Result<Ensured<R>, ReconcileError>
where
    R: Resource,
    A: MetadataApi,
    F: FnOnce() -> Result<R, ApiError>,
{
    let resource = describe::<R>(name);
    if let Some(existing) = first_match::<R, A>(api, name).map_err(|e| ReconcileError::api(&resource, e))? {
        debug!("Reusing {} ({})", resource, existing.id());
        return Ok(Ensured::Reused(existing));
    }
    match create() {
        Ok(created) => {
            debug!("Created {} ({})", resource, created.id());
            Ok(Ensured::Created(created))
        }
        Err(e) if e.is_conflict() => {
            warn!("Create of {} reported a conflict; looking it up again", resource);
            match first_match::<R, A>(api, name).map_err(|le| ReconcileError::api(&resource, le))? {
                Some(existing) => Ok(Ensured::Reused(existing)),
                None => Err(ReconcileError::api(resource, e)),
            }
        }
        Err(e) => Err(ReconcileError::api(resource, e)),
    }
}

/// Deletes every resource of a kind by re-listing the first page until it comes back empty.
///
/// `remove` must make the item disappear from the listing. A pass that lists exactly the ids of the
/// previous pass fails with [`ReconcileError::StalledListing`]. Returns the number removed.
pub fn drain<R, A, F>(api: &A, page_size: usize, mut remove: F) -> Result<usize, ReconcileError>
where
    R: Resource,
    A: MetadataApi,
    F: FnMut(&R) -> Result<(), ReconcileError>,
{
    let mut removed = 0usize;
    let mut previous: Option<Vec<String>> = None;
    loop {
        let page = api
            .list::<R>(&PageRequest::first(page_size))
            .map_err(|e| ReconcileError::api(format!("{} listing", R::KIND.label()), e))?;
        if page.results.is_empty() {
            break;
        }
        let ids: Vec<String> = page.results.iter().map(|r| r.id().to_string()).collect();
        if previous.as_ref() == Some(&ids) {
            return Err(ReconcileError::StalledListing {
                kind: R::KIND,
                remaining: ids.len(),
            });
        }
        debug!(
            "Draining {} {}(s), {} reported in total",
            page.results.len(),
            R::KIND.label(),
            page.meta.total_rows
        );
        for item in &page.results {
            remove(item)?;
            removed += 1;
        }
        previous = Some(ids);
    }
    Ok(removed)
}

/// Every resource of a kind, following bookmarks until the service stops returning one.
pub fn collect_all<R: Resource, A: MetadataApi>(api: &A, page_size: usize) -> Result<Vec<R>, ApiError> {
    let mut all = Vec::new();
    let mut request = PageRequest::first(page_size);
    loop {
        let page = api.list::<R>(&request)?;
        let fetched = page.results.len();
        all.extend(page.results);
        match page.bookmark {
            Some(next) if fetched > 0 && request.bookmark.as_deref() != Some(next.as_str()) => {
                request.bookmark = Some(next);
            }
            _ => break,
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::platform::{DeviceClass, DeviceType, PhysicalInterface, PhysicalInterfaceDraft, ResourceKind};
    use crate::services::testing::FakePlatform;

    fn draft(name: &str) -> PhysicalInterfaceDraft {
        PhysicalInterfaceDraft {
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn first_match_takes_the_first_of_duplicates() {
        let fake = FakePlatform::new();
        let a = fake.create_physical_interface(&draft("OH2-switch-state")).expect("create");
        fake.create_physical_interface(&draft("OH2-switch-state")).expect("create");

        let found = first_match::<PhysicalInterface, _>(&fake, "OH2-switch-state").expect("lookup");
        assert_eq!(found.map(|pi| pi.id), Some(a.id));
        assert!(first_match::<PhysicalInterface, _>(&fake, "OH2-valve-state").expect("lookup").is_none());
    }

    #[test]
    fn create_or_reuse_only_creates_once() {
        let fake = FakePlatform::new();
        let name = "OH2-lock-state";
        let first = create_or_reuse(&fake, name, || fake.create_physical_interface(&draft(name))).expect("ensure");
        let second = create_or_reuse(&fake, name, || fake.create_physical_interface(&draft(name))).expect("ensure");
        assert!(first.was_created());
        assert_eq!(second.verb(), "reused");
        assert_eq!(first.value().id, second.value().id);
        assert_eq!(fake.calls("create physical interface"), 1);
    }

    #[test]
    fn conflict_on_create_falls_back_to_lookup() {
        let fake = FakePlatform::new();
        let name = "OH2-valve-state";
        let ensured = create_or_reuse::<PhysicalInterface, _, _>(&fake, name, || {
            // a concurrent writer wins the race
            fake.create_physical_interface(&draft(name))?;
            Err(ApiError::new(ErrorKind::Conflict, "already exists"))
        })
        .expect("conflict resolves to reuse");
        assert_eq!(ensured.verb(), "reused");
    }

    #[test]
    fn conflict_without_a_match_is_an_error() {
        let fake = FakePlatform::new();
        let err = create_or_reuse::<PhysicalInterface, _, _>(&fake, "ghost", || {
            Err(ApiError::new(ErrorKind::Conflict, "already exists"))
        })
        .expect_err("nothing to reuse");
        assert_eq!(err.kind(), Some(ErrorKind::Conflict));
        assert!(err.to_string().starts_with("physical interface ghost"));
    }

    #[test]
    fn drain_with_page_size_one_removes_everything() {
        let fake = FakePlatform::new();
        for name in ["a", "b", "c"] {
            fake.create_physical_interface(&draft(name)).expect("create");
        }
        let removed = drain::<PhysicalInterface, _, _>(&fake, 1, |pi| {
            fake.delete::<PhysicalInterface>(&pi.id.0)
                .map_err(|e| ReconcileError::api(describe::<PhysicalInterface>(&pi.name), e))
        })
        .expect("drain");
        assert_eq!(removed, 3);
        assert_eq!(fake.count(ResourceKind::PhysicalInterface), 0);
        assert_eq!(fake.calls("list physical interface"), 4);
    }

    #[test]
    fn drain_stops_when_deletes_have_no_effect() {
        let fake = FakePlatform::new();
        fake.create_physical_interface(&draft("stuck")).expect("create");
        fake.ignore_deletes_of(ResourceKind::PhysicalInterface);
        let err = drain::<PhysicalInterface, _, _>(&fake, 25, |pi| {
            fake.delete::<PhysicalInterface>(&pi.id.0)
                .map_err(|e| ReconcileError::api(describe::<PhysicalInterface>(&pi.name), e))
        })
        .expect_err("stalls");
        assert!(matches!(err, ReconcileError::StalledListing { remaining: 1, .. }));
        assert_eq!(fake.calls("delete physical interface"), 1);
        assert_eq!(fake.count(ResourceKind::PhysicalInterface), 1);
    }

    #[test]
    fn collect_all_follows_bookmarks() {
        let fake = FakePlatform::new();
        for id in ["d1", "d2", "d3", "d4", "d5"] {
            fake.seed_device_type(id, DeviceClass::Device);
        }
        let all = collect_all::<DeviceType, _>(&fake, 2).expect("collect");
        let ids: Vec<&str> = all.iter().map(|d| d.id.0.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "d3", "d4", "d5"]);
        assert_eq!(fake.calls("list device type"), 3);
    }

    #[test]
    fn existence_checks_by_name_and_by_id() {
        let fake = FakePlatform::new();
        fake.create_physical_interface(&draft("OH2-valve-state")).expect("create");
        fake.seed_device_type("valve", DeviceClass::Device);

        assert!(fake.exists::<PhysicalInterface>("OH2-valve-state").expect("lookup"));
        assert!(!fake.exists::<PhysicalInterface>("OH2-valve").expect("lookup"));
        assert!(fake.exists_by_id::<DeviceType>("valve").expect("lookup"));
        assert!(!fake.exists_by_id::<DeviceType>("lock").expect("lookup"));

        fake.fail_next("get device type", ErrorKind::Auth);
        let err = fake.exists_by_id::<DeviceType>("valve").expect_err("auth");
        assert_eq!(err.kind, ErrorKind::Auth);
    }
}

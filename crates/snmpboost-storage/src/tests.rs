use crate::admin::CacheAdmin;
use crate::blob::BlobStore;
use crate::indexed::IndexedStore;
use crate::memory::MemoryBackend;
use crate::DeviceStore;
use chrono::Utc;
use snmpboost_common::device::{Device, Instance, Metric, Service, ServiceKey};
use snmpboost_common::types::{Bound, DsType};
use std::sync::Arc;
use std::time::Duration;

fn make_device(host: &str) -> Device {
    let mut device = Device::new(host, "10.0.0.1", "public");

    let key = ServiceKey::new("interface", Some("map(ifTable,eth0)"), Some("eth0"));
    let mut iface = Service::new(key, "if-eth0");
    let mut octets = Metric::new("ifInOctets", ".1.3.6.1.2.1.2.2.1.10.map(ifTable,eth0)", DsType::Derive);
    octets.max = Bound::Oid(".1.3.6.1.2.1.2.2.1.5.map(ifTable,eth0)".into());
    iface.metrics.insert(octets.name.clone(), octets);
    device.update_service(5, iface);

    let mut system = Service::new(ServiceKey::new("system", None, None), "system");
    let mut uptime = Metric::new("sysUpTime", ".1.3.6.1.2.1.1.3.0", DsType::Gauge);
    uptime.raw_value = Some("1234".into());
    system.metrics.insert(uptime.name.clone(), uptime);
    device.update_service(10, system);

    device.group_mut(10).unwrap().check_time = Some(Utc::now());
    device
}

fn stores() -> Vec<(&'static str, Box<dyn DeviceStore>)> {
    vec![
        ("blob", Box::new(BlobStore::new(Arc::new(MemoryBackend::new())))),
        ("indexed", Box::new(IndexedStore::new(Arc::new(MemoryBackend::new())))),
    ]
}

#[tokio::test]
async fn both_layouts_round_trip_the_same_device() {
    let device = make_device("router-1");
    for (name, store) in stores() {
        store.put_device(&device).await.unwrap();
        let loaded = store.get_device("router-1").await.unwrap();
        assert_eq!(loaded.as_ref(), Some(&device), "layout {name}");
        assert_eq!(store.list_hosts().await.unwrap(), vec!["router-1".to_string()]);
    }
}

#[tokio::test]
async fn missing_device_is_none() {
    for (_, store) in stores() {
        assert!(store.get_device("nope").await.unwrap().is_none());
        assert!(!store.delete_device("nope").await.unwrap());
    }
}

#[tokio::test]
async fn find_frequency_locates_service_group() {
    let device = make_device("router-1");
    let iface_id = ServiceKey::new("interface", Some("map(ifTable,eth0)"), Some("eth0")).id();
    for (name, store) in stores() {
        store.put_device(&device).await.unwrap();
        assert_eq!(store.find_frequency("router-1", &iface_id).await.unwrap(), Some(5), "layout {name}");
        assert_eq!(store.find_frequency("router-1", "ghost::").await.unwrap(), None);
    }
}

#[tokio::test]
async fn moved_service_leaves_no_stale_group() {
    let mut device = make_device("router-1");
    for (name, store) in stores() {
        store.put_device(&device).await.unwrap();
        let system = device.group(10).unwrap().services.values().next().unwrap().clone();
        device.update_service(5, system);
        device.frequencies.retain(|_, g| !g.services.is_empty());
        store.put_device(&device).await.unwrap();

        let loaded = store.get_device("router-1").await.unwrap().unwrap();
        assert_eq!(loaded.frequencies.keys().copied().collect::<Vec<_>>(), vec![5], "layout {name}");
        assert_eq!(loaded.group(5).unwrap().services.len(), 2);
        device = make_device("router-1");
    }
}

#[tokio::test]
async fn records_expire_after_ttl() {
    let backend = Arc::new(MemoryBackend::new());
    let store = BlobStore::new(backend).with_ttl(Duration::from_millis(20));
    store.put_device(&make_device("router-1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(store.get_device("router-1").await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_blob_is_reported() {
    use crate::KvBackend;
    let backend = Arc::new(MemoryBackend::new());
    backend
        .set("snmpboost:device:router-1", "{not json", None)
        .await
        .unwrap();
    let store = BlobStore::new(backend);
    let err = store.get_device("router-1").await.unwrap_err();
    assert!(matches!(err, crate::error::StoreError::Corrupt { .. }));
    assert!(!err.is_unreachable());
}

#[tokio::test]
async fn lease_is_exclusive_and_owner_checked() {
    init_ids();
    for (_, store) in stores() {
        let lease = store
            .acquire_lease("router-1", 5, Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .acquire_lease("router-1", 5, Duration::from_secs(10))
            .await
            .unwrap()
            .is_none());
        // Other groups are independent.
        assert!(store
            .acquire_lease("router-1", 10, Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
        assert!(store.release_lease(&lease).await.unwrap());
        assert!(!store.release_lease(&lease).await.unwrap());
        assert!(store
            .acquire_lease("router-1", 5, Duration::from_secs(10))
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn abandoned_lease_expires() {
    init_ids();
    let store = BlobStore::new(Arc::new(MemoryBackend::new()));
    let stale = store
        .acquire_lease("router-1", 5, Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    let fresh = store
        .acquire_lease("router-1", 5, Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();
    assert!(!store.release_lease(&stale).await.unwrap());
    assert!(store.release_lease(&fresh).await.unwrap());
}

fn init_ids() {
    snmpboost_common::id::init(1, 1);
}

#[tokio::test]
async fn admin_search_matches_globs() {
    for (_, store) in stores() {
        store.put_device(&make_device("router-1")).await.unwrap();
        store.put_device(&make_device("switch-1")).await.unwrap();
        let admin = CacheAdmin::new(store.as_ref());

        let hits = admin.search(Some("router-*"), None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.host == "router-1"));

        let hits = admin.search(None, Some("interface:*")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.interval == 5));
    }
}

#[tokio::test]
async fn admin_clear_mapping_resets_to_pending() {
    for (_, store) in stores() {
        let mut device = make_device("router-1");
        for group in device.frequencies.values_mut() {
            for service in group.services.values_mut() {
                service.resolve("7");
            }
        }
        device.instances.insert("eth0".into(), "7".into());
        store.put_device(&device).await.unwrap();

        let admin = CacheAdmin::new(store.as_ref());
        assert_eq!(admin.clear_mapping("router-1", None).await.unwrap(), 1);

        let loaded = store.get_device("router-1").await.unwrap().unwrap();
        assert!(loaded.instances.is_empty());
        let iface = loaded.group(5).unwrap().services.values().next().unwrap();
        assert!(matches!(iface.instance, Instance::Pending { .. }));
    }
}

#[tokio::test]
async fn admin_clear_mapping_spares_static_and_unmatched_services() {
    for (_, store) in stores() {
        let mut device = make_device("router-1");
        let key = ServiceKey::new("interface", Some("map(ifTable,eth1)"), Some("eth1"));
        let mut eth1 = Service::new(key, "if-eth1");
        eth1.metrics.insert(
            "ifInOctets".into(),
            Metric::new("ifInOctets", ".1.3.6.1.2.1.2.2.1.10.map(ifTable,eth1)", DsType::Derive),
        );
        device.update_service(5, eth1);

        let mut fixed = Service::new(ServiceKey::new("ifstatic", Some("3"), None), "if-3");
        let mut octets = Metric::new("ifInOctets", ".1.3.6.1.2.1.2.2.1.10.3", DsType::Derive);
        octets.raw_value = Some("200".into());
        octets.raw_old_value = Some("100".into());
        fixed.metrics.insert(octets.name.clone(), octets);
        device.update_service(5, fixed);

        for service in device.group_mut(5).unwrap().services.values_mut() {
            let index = if service.name == "if-eth1" { "8" } else { "7" };
            service.resolve(index);
        }
        device.instances.insert("eth0".into(), "7".into());
        device.instances.insert("eth1".into(), "8".into());
        store.put_device(&device).await.unwrap();

        let admin = CacheAdmin::new(store.as_ref());
        assert_eq!(admin.clear_mapping("router-1", Some("*eth0")).await.unwrap(), 1);

        let loaded = store.get_device("router-1").await.unwrap().unwrap();
        assert_eq!(loaded.instances.get("eth1").map(String::as_str), Some("8"));
        assert!(!loaded.instances.contains_key("eth0"));
        let group = loaded.group(5).unwrap();
        let by_name = |name: &str| group.services.values().find(|s| s.name == name).unwrap();
        assert!(by_name("if-eth0").instance.is_pending());
        assert_eq!(by_name("if-eth1").instance, Instance::Resolved("8".into()));
        let fixed = &by_name("if-3").metrics["ifInOctets"];
        assert_eq!(fixed.raw_old_value.as_deref(), Some("100"));

        // A static index is never put back to pending, even without a pattern.
        assert_eq!(admin.clear_mapping("router-1", None).await.unwrap(), 2);
        let loaded = store.get_device("router-1").await.unwrap().unwrap();
        let group = loaded.group(5).unwrap();
        let fixed = group.services.values().find(|s| s.name == "if-3").unwrap();
        assert_eq!(fixed.metrics["ifInOctets"].raw_value.as_deref(), Some("200"));
    }
}

#[tokio::test]
async fn admin_delete_and_force() {
    for (_, store) in stores() {
        store.put_device(&make_device("router-1")).await.unwrap();
        let admin = CacheAdmin::new(store.as_ref());

        assert_eq!(admin.force("router-1", Some(10)).await.unwrap(), 1);
        let loaded = store.get_device("router-1").await.unwrap().unwrap();
        assert!(loaded.group(10).unwrap().forced);
        assert!(!loaded.group(5).unwrap().forced);

        assert!(admin.delete_service("router-1", "system::").await.unwrap());
        let loaded = store.get_device("router-1").await.unwrap().unwrap();
        assert!(loaded.group(10).is_none());

        assert!(admin.delete_host("router-1").await.unwrap());
        assert!(store.get_device("router-1").await.unwrap().is_none());
        assert!(admin.list_hosts().await.unwrap().is_empty());
    }
}

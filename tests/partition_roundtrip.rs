//! End-to-end partition round-trips over in-memory files.

use mxfio::{
    encode_ber_length, labels, CollectSink, FileRef, IndexTable, IndexTableSegment,
    MetadataObject, MxfFile, MxfSession, Partition, PropertyValue, Rational, Reference,
    StaticRegistry, TypeRegistry, Ul,
};

fn picture_essence_ul() -> Ul {
    Ul([
        0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x15, 0x01, 0x05,
        0x01,
    ])
}

fn write_essence(file: &FileRef, value: &[u8]) {
    let mut f = file.borrow_mut();
    f.write(picture_essence_ul().as_bytes()).unwrap();
    f.write(&encode_ber_length(value.len() as u64)).unwrap();
    f.write(value).unwrap();
}

/// Preface -> ContentStorage -> MaterialPackage -> Track -> Sequence
/// -> SourceClip, plus an Identification hanging off the preface.
fn build_structural_graph(
    partition: &mut Partition,
    registry: &StaticRegistry,
    sink: &mut CollectSink,
) {
    let preface_d = registry.lookup_name("Preface").unwrap();
    let storage_d = registry.lookup_name("ContentStorage").unwrap();
    let ident_d = registry.lookup_name("Identification").unwrap();
    let package_d = registry.lookup_name("MaterialPackage").unwrap();
    let track_d = registry.lookup_name("TimelineTrack").unwrap();
    let sequence_d = registry.lookup_name("Sequence").unwrap();
    let clip_d = registry.lookup_name("SourceClip").unwrap();

    let mut clip = MetadataObject::of_type(clip_d);
    clip.set_property(clip_d, "Duration", PropertyValue::Int64(250))
        .unwrap();
    clip.set_property(clip_d, "StartPosition", PropertyValue::Int64(0))
        .unwrap();
    let clip_uuid = clip.instance_uid.unwrap();

    let mut sequence = MetadataObject::of_type(sequence_d);
    sequence
        .set_property(sequence_d, "Duration", PropertyValue::Int64(250))
        .unwrap();
    sequence
        .set_property(
            sequence_d,
            "StructuralComponents",
            PropertyValue::StrongRefArray(vec![Reference::to(clip_uuid)]),
        )
        .unwrap();
    let sequence_uuid = sequence.instance_uid.unwrap();

    let mut track = MetadataObject::of_type(track_d);
    track
        .set_property(track_d, "TrackID", PropertyValue::UInt32(1))
        .unwrap();
    track
        .set_property(
            track_d,
            "EditRate",
            PropertyValue::Rational(Rational::new(25, 1)),
        )
        .unwrap();
    track
        .set_property(track_d, "TrackName", PropertyValue::Utf16("V1".into()))
        .unwrap();
    track
        .set_property(
            track_d,
            "Sequence",
            PropertyValue::StrongRef(Reference::to(sequence_uuid)),
        )
        .unwrap();
    let track_uuid = track.instance_uid.unwrap();

    let mut package = MetadataObject::of_type(package_d);
    package
        .set_property(
            package_d,
            "Name",
            PropertyValue::Utf16("Main program".into()),
        )
        .unwrap();
    package
        .set_property(
            package_d,
            "Tracks",
            PropertyValue::StrongRefArray(vec![Reference::to(track_uuid)]),
        )
        .unwrap();
    let package_uuid = package.instance_uid.unwrap();

    let mut storage = MetadataObject::of_type(storage_d);
    storage
        .set_property(
            storage_d,
            "Packages",
            PropertyValue::StrongRefArray(vec![Reference::to(package_uuid)]),
        )
        .unwrap();
    let storage_uuid = storage.instance_uid.unwrap();

    let ident = MetadataObject::of_type(ident_d);
    let ident_uuid = ident.instance_uid.unwrap();

    let mut preface = MetadataObject::of_type(preface_d);
    preface
        .set_property(
            preface_d,
            "OperationalPattern",
            PropertyValue::Ul(labels::OP1A),
        )
        .unwrap();
    preface
        .set_property(
            preface_d,
            "ContentStorage",
            PropertyValue::StrongRef(Reference::to(storage_uuid)),
        )
        .unwrap();
    preface
        .set_property(
            preface_d,
            "Identifications",
            PropertyValue::StrongRefArray(vec![Reference::to(ident_uuid)]),
        )
        .unwrap();

    // Parents before children: every child reference is a forward
    // reference and must drain as the children register
    partition.add_metadata(preface, sink);
    partition.add_metadata(storage, sink);
    partition.add_metadata(ident, sink);
    partition.add_metadata(package, sink);
    partition.add_metadata(track, sink);
    partition.add_metadata(sequence, sink);
    partition.add_metadata(clip, sink);
}

#[test]
fn full_file_roundtrip() {
    let registry = StaticRegistry::baseline();
    let mut sink = CollectSink::new();

    // Build the file: header with metadata, index and essence, then a
    // footer, then the random index pack
    let (file, buffer) = MxfFile::memory();
    let mut session = MxfSession::create(file);

    let mut header = Partition::header();
    header.set_kag(512);
    header.pack.body_sid = 1;
    header.pack.index_sid = 2;
    header.pack.add_essence_container(picture_essence_ul());
    build_structural_graph(&mut header, &registry, &mut sink);
    assert!(sink.warnings.is_empty(), "warnings: {:?}", sink.warnings);

    header.write(session.file(), &registry).unwrap();
    header
        .write_index(
            session.file(),
            &[IndexTableSegment {
                index_start_position: 0,
                index_duration: 2,
                edit_unit_byte_count: 0x2000,
                index_sid: 2,
                body_sid: 1,
                ..Default::default()
            }],
        )
        .unwrap();

    header.align(session.file()).unwrap();
    write_essence(session.file(), &[0x11; 0x2000]);
    write_essence(session.file(), &[0x22; 0x2000]);

    let mut footer = Partition::footer();
    footer.write(session.file(), &registry).unwrap();

    session.push_partition(header);
    session.push_partition(footer);
    session.finalize().unwrap();

    // Reopen and verify everything
    let (file, _copy) = MxfFile::from_bytes(buffer.contents());
    let mut session = MxfSession::from_file(file).unwrap();
    assert_eq!(session.partitions().len(), 2);
    assert!(session.rip().is_some());

    let header = &mut session.partitions_mut()[0];
    let mut sink = CollectSink::new();
    header.read_metadata(&registry, &mut sink).unwrap();
    assert!(sink.warnings.is_empty(), "warnings: {:?}", sink.warnings);

    // Graph shape
    assert_eq!(header.all_metadata().len(), 7);
    assert_eq!(header.top_level_metadata().len(), 1);
    let preface_id = header.top_level_metadata()[0];
    assert!(header
        .object(preface_id)
        .unwrap()
        .ul
        .matches(&labels::PREFACE));
    assert!(header.unmatched_refs().is_empty());

    // Walk preface -> storage -> package -> track -> sequence -> clip
    let preface = header.object(preface_id).unwrap();
    let storage_ref = match &preface.property("ContentStorage").unwrap().value {
        PropertyValue::StrongRef(r) => *r,
        other => panic!("unexpected value {:?}", other),
    };
    let storage_id = storage_ref.target.expect("storage ref resolved");
    assert_eq!(header.find_link_parent(storage_id), Some(preface_id));

    let clip_ids = header.objects_of_type(&labels::SOURCE_CLIP);
    assert_eq!(clip_ids.len(), 1);
    let clip = header.object(clip_ids[0]).unwrap();
    assert_eq!(
        clip.property("Duration").unwrap().value,
        PropertyValue::Int64(250)
    );

    let track_ids = header.objects_of_type(&labels::TIMELINE_TRACK);
    let track = header.object(track_ids[0]).unwrap();
    assert_eq!(
        track.property("TrackName").unwrap().value,
        PropertyValue::Utf16("V1".into())
    );

    // Index lookup
    let mut table = IndexTable::new();
    assert!(header.read_index_into(&mut table, &mut sink).unwrap());
    assert_eq!(table.offset_for(1, 1), Some(0x2000));

    // Essence iteration: exactly two elements, values on demand
    assert!(header.start_elements().unwrap());
    let mut first = header.next_element().unwrap().unwrap();
    assert_eq!(first.value_length(), 0x2000);
    first.read_data_from(0, 16).unwrap();
    assert_eq!(first.data(), &[0x11; 16]);

    let second = header.next_element().unwrap().unwrap();
    assert_eq!(second.value_length(), 0x2000);
    assert!(header.next_element().unwrap().is_none());
}

#[test]
fn rewrite_is_a_fixed_point() {
    let registry = StaticRegistry::baseline();
    let mut sink = CollectSink::new();

    // Original
    let (file_a, buffer_a) = MxfFile::memory();
    let file_a = file_a.shared();
    let mut original = Partition::header();
    build_structural_graph(&mut original, &registry, &mut sink);
    original.write(&file_a, &registry).unwrap();

    // First rewrite: reread A, serialise to B
    let (file, _copy) = MxfFile::from_bytes(buffer_a.contents());
    let file = file.shared();
    let mut reread_a = Partition::read_from(&file).unwrap();
    reread_a.read_metadata(&registry, &mut sink).unwrap();

    let (file_b, buffer_b) = MxfFile::memory();
    let file_b = file_b.shared();
    reread_a.write(&file_b, &registry).unwrap();

    // Second rewrite: reread B, serialise to C
    let (file, _copy) = MxfFile::from_bytes(buffer_b.contents());
    let file = file.shared();
    let mut reread_b = Partition::read_from(&file).unwrap();
    reread_b.read_metadata(&registry, &mut sink).unwrap();

    let (file_c, buffer_c) = MxfFile::memory();
    let file_c = file_c.shared();
    reread_b.write(&file_c, &registry).unwrap();

    // Deterministic primer assignment and set ordering make the
    // serialisation stable
    assert_eq!(buffer_b.contents(), buffer_c.contents());
    assert!(sink.warnings.is_empty(), "warnings: {:?}", sink.warnings);
}

#[test]
fn dangling_weak_ref_is_tolerated_on_file_read() {
    let registry = StaticRegistry::baseline();
    let mut sink = CollectSink::new();

    let (file, buffer) = MxfFile::memory();
    let file = file.shared();

    let mut partition = Partition::header();
    let preface_d = registry.lookup_name("Preface").unwrap();
    let mut preface = MetadataObject::of_type(preface_d);
    preface
        .set_property(
            preface_d,
            "PrimaryPackage",
            PropertyValue::WeakRef(Reference::to(uuid::Uuid::new_v4())),
        )
        .unwrap();
    partition.add_metadata(preface, &mut sink);
    partition.write(&file, &registry).unwrap();

    let (file, _copy) = MxfFile::from_bytes(buffer.contents());
    let file = file.shared();
    let mut reread = Partition::read_from(&file).unwrap();

    let mut sink = CollectSink::new();
    reread.read_metadata(&registry, &mut sink).unwrap();

    assert_eq!(reread.unmatched_refs().len(), 1);
    assert!(!sink.warnings.is_empty());
}

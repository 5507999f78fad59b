//! # tsfile-engine 使用案例
//!
//! 演示两种数据模型的写入与查询：
//!
//! 1. 表模型：定义表、写入 Tablet、关闭文件
//! 2. 表模型查询：投影 + 时间范围 + 值过滤
//! 3. 树模型：注册测点、写入两个设备
//! 4. 树模型查询：多序列按时间对齐
//! 5. 统计信息

use tsfile_engine::{
    ColumnSchema, CompareOp, DeviceId, Filter, MeasurementSchema, TableSchema,
    TableWriter, Tablet, TreeWriter, TsDataType, TsFileReader,
};

fn main() -> tsfile_engine::Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   tsfile-engine 演示                                        ");
    println!("═══════════════════════════════════════════════════════════\n");

    let dir = std::env::temp_dir();
    let table_path = dir.join("tsfile-demo-table.tsfile");
    let tree_path  = dir.join("tsfile-demo-tree.tsfile");

    // =========================================================================
    // 1. 表模型写入
    // =========================================================================
    println!("【1】表模型写入 `sensors` ...");
    // sensors (region TAG, device TAG, temperature FIELD, humidity FIELD)
    let schema = TableSchema::new("sensors", vec![
        ColumnSchema::tag("region", TsDataType::String),
        ColumnSchema::tag("device", TsDataType::String),
        ColumnSchema::field("temperature", TsDataType::Double),
        ColumnSchema::field("humidity",    TsDataType::Float),
    ])?;
    let mut writer = TableWriter::create(&table_path, schema.clone())?;

    let mut tablet = Tablet::from_table_schema(&schema, 16)?;
    for row in 0..10usize {
        let device = if row < 5 { "d1" } else { "d2" };
        tablet.add_timestamp(row, 1_700_000_000_000 + row as i64 * 1_000)?;
        tablet.add_value(row, "region", "north")?;
        tablet.add_value(row, "device", device)?;
        tablet.add_value(row, "temperature", 20.0 + row as f64 * 0.5)?;
        if row % 3 != 0 {
            tablet.add_value(row, "humidity", 40.0f32 + row as f32)?;
        }
    }
    writer.write_table(&tablet)?;
    writer.close()?;
    println!("    ✓ 写入 {} 行 → {}\n", tablet.row_count(), table_path.display());

    // =========================================================================
    // 2. 表模型查询
    // =========================================================================
    println!("【2】查询 temperature > 21.0 ...");
    let reader = TsFileReader::open(&table_path)?;
    let filter = Filter::value("temperature", CompareOp::Gt, 21.0f64);
    let mut rs = reader.query_table(
        "sensors", &["device", "temperature", "humidity"], i64::MIN, i64::MAX, Some(filter),
    )?;
    let meta = rs.metadata().clone();
    let header: Vec<&str> = (1..=meta.column_count()).filter_map(|i| meta.column_name(i).ok()).collect();
    println!("    {}", header.join(" | "));
    while rs.next()? {
        let humidity = match rs.get_opt::<f32>("humidity")? {
            Some(h) => format!("{h:.1}"),
            None    => "null".to_string(),
        };
        println!(
            "    {} | {} | {:.1} | {}",
            rs.timestamp()?,
            rs.get_value::<String>("device")?,
            rs.get_value::<f64>("temperature")?,
            humidity,
        );
    }
    println!();

    // =========================================================================
    // 3. 树模型写入
    // =========================================================================
    println!("【3】树模型写入 root.plant.d1 / root.plant.d2 ...");
    let mut writer = TreeWriter::create(&tree_path)?;
    let speed = MeasurementSchema::new("speed", TsDataType::Int64);
    writer.register_timeseries("root.plant.d1", speed.clone())?;
    writer.register_timeseries("root.plant.d2", speed.clone())?;

    for (device, times) in [("root.plant.d1", [0i64, 2, 4]), ("root.plant.d2", [1, 2, 3])] {
        let mut t = Tablet::for_device(device, &[speed.clone()], 4)?;
        for (row, ts) in times.iter().enumerate() {
            t.add_timestamp(row, *ts)?;
            t.add_value(row, "speed", ts * 100)?;
        }
        writer.write_tablet(&t)?;
    }
    writer.close()?;
    println!("    ✓ OK\n");

    // =========================================================================
    // 4. 树模型查询
    // =========================================================================
    println!("【4】对齐查询 root.plant.d1.speed, root.plant.d2.speed ...");
    let reader = TsFileReader::open(&tree_path)?;
    let mut rs = reader.query_tree(&["root.plant.d1.speed", "root.plant.d2.speed"], 0, 10, None)?;
    while rs.next()? {
        let cell = |v: Option<i64>| v.map_or("null".to_string(), |v| v.to_string());
        println!(
            "    t={} d1={} d2={}",
            rs.timestamp()?,
            cell(rs.get_opt::<i64>(2)?),
            cell(rs.get_opt::<i64>(3)?),
        );
    }
    println!();

    // =========================================================================
    // 5. 统计信息
    // =========================================================================
    println!("【5】序列统计 ...");
    let stats = reader.timeseries_statistics(&DeviceId::tree("root.plant.d1"), "speed")?;
    println!("    count = {}", stats.count);
    println!("    time  = [{}, {}]", stats.start_time, stats.end_time);
    println!("    min   = {:?}", stats.min);
    println!("    max   = {:?}", stats.max);

    println!("\n═══════════════════════════════════════════════════════════");
    println!("   演示完成");
    println!("═══════════════════════════════════════════════════════════");
    Ok(())
}
